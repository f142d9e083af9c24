//! XA-ADPCM audio decoding.
//!
//! XA sectors carry 18 sound groups of 128 bytes: a 16-byte parameter
//! block followed by 112 data bytes holding 28-sample units. Each unit's
//! parameter byte selects a shift range and one of four two-tap prediction
//! filters.

use strdec_core::error::Result;
use strdec_core::sector::{IdentifiedSector, XaAudioSector};

use crate::demux::{DecodedAudio, SectorAudioDecoder};

/// Prediction filter coefficients, numerator over 64.
const K0: [i32; 5] = [0, 60, 115, 98, 122];
const K1: [i32; 5] = [0, 0, -52, -55, -60];

const GROUP_SIZE: usize = 128;
const SAMPLES_PER_UNIT: usize = 28;

/// One channel's running predictor state.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    prev1: i32,
    prev2: i32,
}

impl ChannelState {
    fn decode_sample(&mut self, shifted: i32, filter: usize) -> i16 {
        let sample =
            shifted + (self.prev1 * K0[filter] + self.prev2 * K1[filter] + 32) / 64;
        let sample = sample.clamp(-32768, 32767);
        self.prev2 = self.prev1;
        self.prev1 = sample;
        sample as i16
    }
}

/// An XA audio stream's identity on the disc, used to gate which sectors
/// belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XaAudioStream {
    /// Interleave channel.
    pub channel: u8,
    /// 18900 or 37800.
    pub samples_per_second: u32,
    /// 4 or 8.
    pub bits_per_sample: u8,
    /// Stereo flag.
    pub stereo: bool,
}

impl XaAudioStream {
    /// Whether `sector` continues this stream: same channel, same sample
    /// depth and the same sample rate.
    pub fn is_part_of_stream(&self, sector: &XaAudioSector) -> bool {
        sector.channel == self.channel
            && sector.bits_per_sample == self.bits_per_sample
            && sector.samples_per_second == self.samples_per_second
    }
}

/// Decodes one XA audio stream's sectors into 16-bit PCM.
pub struct XaAudioDecoder {
    stream: XaAudioStream,
    left: ChannelState,
    right: ChannelState,
}

impl XaAudioDecoder {
    /// Create a decoder for `stream`.
    pub fn new(stream: XaAudioStream) -> Self {
        Self {
            stream,
            left: ChannelState::default(),
            right: ChannelState::default(),
        }
    }

    fn decode_sector(&mut self, sector: &XaAudioSector) -> DecodedAudio {
        let mut pcm = Vec::new();
        for group in sector.payload.chunks_exact(GROUP_SIZE) {
            if self.stream.bits_per_sample == 4 {
                self.decode_group_4bit(group, &mut pcm);
            } else {
                self.decode_group_8bit(group, &mut pcm);
            }
        }
        DecodedAudio {
            data: pcm,
            presentation_sector: sector.sector_number,
        }
    }

    fn decode_group_4bit(&mut self, group: &[u8], pcm: &mut Vec<u8>) {
        let params = &group[0..16];
        let data = &group[16..GROUP_SIZE];
        // 8 units of 28 nibbles; stereo alternates L/R units
        for unit in 0..8 {
            let param = params[4 + unit] as u32;
            let range = param & 0x0F;
            let filter = ((param >> 4) & 0x03) as usize;
            let state = if self.stream.stereo && unit % 2 == 1 {
                &mut self.right
            } else {
                &mut self.left
            };
            let mut samples = [0i16; SAMPLES_PER_UNIT];
            for (i, sample) in samples.iter_mut().enumerate() {
                let byte = data[i * 4 + unit / 2];
                let nibble = if unit % 2 == 0 { byte & 0x0F } else { byte >> 4 };
                let raw = ((nibble as i32) << 28) >> 28;
                *sample = state.decode_sample((raw << 12) >> range.min(12), filter);
            }
            push_unit(pcm, &samples, self.stream.stereo, unit % 2 == 1);
        }
    }

    fn decode_group_8bit(&mut self, group: &[u8], pcm: &mut Vec<u8>) {
        let params = &group[0..16];
        let data = &group[16..GROUP_SIZE];
        // 4 units of 28 bytes
        for unit in 0..4 {
            let param = params[4 + unit] as u32;
            let range = param & 0x0F;
            let filter = ((param >> 4) & 0x03) as usize;
            let state = if self.stream.stereo && unit % 2 == 1 {
                &mut self.right
            } else {
                &mut self.left
            };
            let mut samples = [0i16; SAMPLES_PER_UNIT];
            for (i, sample) in samples.iter_mut().enumerate() {
                let byte = data[i * 4 + unit];
                let raw = ((byte as i32) << 24) >> 24;
                *sample = state.decode_sample((raw << 8) >> range.min(8), filter);
            }
            push_unit(pcm, &samples, self.stream.stereo, unit % 2 == 1);
        }
    }
}

/// Append one decoded unit. Stereo interleaving pairs each left unit with
/// the right unit that follows it, so left units are buffered positionally:
/// left samples land at even sample slots, right at odd.
fn push_unit(pcm: &mut Vec<u8>, samples: &[i16; SAMPLES_PER_UNIT], stereo: bool, is_right: bool) {
    if !stereo {
        for &s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        return;
    }
    if !is_right {
        // reserve interleaved space for this unit's pair
        let base = pcm.len();
        pcm.resize(base + SAMPLES_PER_UNIT * 4, 0);
        for (i, &s) in samples.iter().enumerate() {
            let at = base + i * 4;
            pcm[at..at + 2].copy_from_slice(&s.to_le_bytes());
        }
    } else {
        let base = pcm.len() - SAMPLES_PER_UNIT * 4;
        for (i, &s) in samples.iter().enumerate() {
            let at = base + i * 4 + 2;
            pcm[at..at + 2].copy_from_slice(&s.to_le_bytes());
        }
    }
}

impl SectorAudioDecoder for XaAudioDecoder {
    fn feed_sector(&mut self, sector: &IdentifiedSector) -> Result<Vec<DecodedAudio>> {
        match sector {
            IdentifiedSector::XaAudio(xa) if self.stream.is_part_of_stream(xa) => {
                Ok(vec![self.decode_sector(xa)])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn samples_per_second(&self) -> u32 {
        self.stream.samples_per_second
    }

    fn channels(&self) -> u16 {
        if self.stream.stereo {
            2
        } else {
            1
        }
    }

    fn reset(&mut self) {
        self.left = ChannelState::default();
        self.right = ChannelState::default();
    }
}
