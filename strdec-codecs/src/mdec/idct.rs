//! Inverse (and forward) discrete cosine transforms for 8x8 blocks.
//!
//! Two tiers: a fixed-point integer IDCT for the fast decoder and a
//! double-precision separable IDCT/DCT pair for the high-quality decoder
//! and the encoder. Both use the orthonormal scaling where a flat block
//! with DC coefficient `c` reconstructs to `c / 8` per sample.

use std::f64::consts::PI;
use std::sync::OnceLock;

/// Fixed-point fraction bits for the integer path.
const FIXED_BITS: i32 = 11;

/// Cosine basis including the per-pass 1/2: `t[k][n] = c(k) *
/// cos((2n+1) k pi / 16) / 2`, scaled to fixed point for the integer tier.
fn int_basis() -> &'static [[i32; 8]; 8] {
    static TABLE: OnceLock<[[i32; 8]; 8]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [[0i32; 8]; 8];
        for k in 0..8 {
            let c = if k == 0 { 1.0 / 2.0f64.sqrt() } else { 1.0 };
            for n in 0..8 {
                let v = c * (PI * (2 * n + 1) as f64 * k as f64 / 16.0).cos() * 0.5;
                t[k][n] = (v * (1 << FIXED_BITS) as f64).round() as i32;
            }
        }
        t
    })
}

fn f64_basis() -> &'static [[f64; 8]; 8] {
    static TABLE: OnceLock<[[f64; 8]; 8]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [[0f64; 8]; 8];
        for k in 0..8 {
            let c = if k == 0 { 1.0 / 2.0f64.sqrt() } else { 1.0 };
            for n in 0..8 {
                t[k][n] = c * (PI * (2 * n + 1) as f64 * k as f64 / 16.0).cos() * 0.5;
            }
        }
        t
    })
}

/// Fixed-point inverse DCT on raster-order coefficients.
pub fn idct_int(block: &[i32; 64]) -> [i32; 64] {
    let basis = int_basis();
    let round = 1 << (FIXED_BITS - 1);

    let mut temp = [0i32; 64];
    for row in 0..8 {
        for x in 0..8 {
            let mut sum = 0i64;
            for u in 0..8 {
                sum += basis[u][x] as i64 * block[row * 8 + u] as i64;
            }
            temp[row * 8 + x] = ((sum + round as i64) >> FIXED_BITS) as i32;
        }
    }

    let mut output = [0i32; 64];
    for col in 0..8 {
        for y in 0..8 {
            let mut sum = 0i64;
            for v in 0..8 {
                sum += basis[v][y] as i64 * temp[v * 8 + col] as i64;
            }
            output[y * 8 + col] = ((sum + round as i64) >> FIXED_BITS) as i32;
        }
    }
    output
}

/// Double-precision inverse DCT on raster-order coefficients.
pub fn idct_f64(block: &[f64; 64]) -> [f64; 64] {
    let basis = f64_basis();

    let mut temp = [0f64; 64];
    for row in 0..8 {
        for x in 0..8 {
            let mut sum = 0.0;
            for u in 0..8 {
                sum += basis[u][x] * block[row * 8 + u];
            }
            temp[row * 8 + x] = sum;
        }
    }

    let mut output = [0f64; 64];
    for col in 0..8 {
        for y in 0..8 {
            let mut sum = 0.0;
            for v in 0..8 {
                sum += basis[v][y] * temp[v * 8 + col];
            }
            output[y * 8 + col] = sum;
        }
    }
    output
}

/// Double-precision forward DCT on raster-order samples.
pub fn fdct_f64(samples: &[f64; 64]) -> [f64; 64] {
    let basis = f64_basis();

    let mut temp = [0f64; 64];
    for row in 0..8 {
        for u in 0..8 {
            let mut sum = 0.0;
            for x in 0..8 {
                sum += basis[u][x] * samples[row * 8 + x];
            }
            temp[row * 8 + u] = sum;
        }
    }

    let mut output = [0f64; 64];
    for col in 0..8 {
        for v in 0..8 {
            let mut sum = 0.0;
            for y in 0..8 {
                sum += basis[v][y] * temp[y * 8 + col];
            }
            output[v * 8 + col] = sum;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_dc_int() {
        let mut block = [0i32; 64];
        block[0] = 40;
        let out = idct_int(&block);
        assert!(out.iter().all(|&v| v == 5), "{out:?}");
    }

    #[test]
    fn test_flat_dc_f64() {
        let mut block = [0f64; 64];
        block[0] = 40.0;
        let out = idct_f64(&block);
        for v in out {
            assert!((v - 5.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_fdct_idct_round_trip() {
        let mut samples = [0f64; 64];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = ((i % 8) as f64 - 3.5) * 4.0 + (i / 8) as f64;
        }
        let coeffs = fdct_f64(&samples);
        let back = idct_f64(&coeffs);
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_int_and_f64_agree() {
        let mut block_i = [0i32; 64];
        let mut block_f = [0f64; 64];
        for i in 0..64 {
            let v = ((i as i32 * 7) % 41) - 20;
            block_i[i] = v * 4;
            block_f[i] = (v * 4) as f64;
        }
        let out_i = idct_int(&block_i);
        let out_f = idct_f64(&block_f);
        for (a, b) in out_i.iter().zip(&out_f) {
            assert!((*a as f64 - b).abs() <= 2.0, "{a} vs {b}");
        }
    }
}
