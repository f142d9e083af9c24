//! Live playback plumbing.
//!
//! Three cooperating threads: a reader that decodes frames into pooled
//! rasters and fills a bounded queue, a presentation loop that waits for
//! each frame's presentation time and renders it, and the audio device's
//! own blocking writer fed through a sector-timed pump. Pure blocking
//! throughout; the bounded queue and the device buffer provide the
//! backpressure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strdec_core::error::{Error, Result};
use strdec_core::pool::SharedObjectPool;
use strdec_core::rational::Rational;

use crate::sync::AudioSync;

/// A blocking audio output line.
pub trait AudioSink {
    /// Write interleaved PCM; blocks while the device buffer is full.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Write `sample_frames` of silence.
    fn write_silence(&mut self, sample_frames: u64) -> Result<()>;

    /// Bytes per sample frame.
    fn block_align(&self) -> usize;
}

/// Keeps a blocking audio line aligned with presentation sectors by
/// prepending silence when the stream falls behind.
pub struct SectorTimedAudioPump<S: AudioSink> {
    sink: S,
    sync: AudioSync,
    samples_written: u64,
}

impl<S: AudioSink> SectorTimedAudioPump<S> {
    /// Create a pump for a stream starting at `start_sector`.
    pub fn new(sink: S, start_sector: u32, sectors_per_second: u32, samples_per_second: u32) -> Self {
        Self {
            sink,
            sync: AudioSync::new(start_sector, sectors_per_second, samples_per_second),
            samples_written: 0,
        }
    }

    /// Write one buffer presented at `presentation_sector`.
    pub fn write(&mut self, data: &[u8], presentation_sector: u32) -> Result<()> {
        if data.len() % self.sink.block_align() != 0 {
            return Err(Error::invalid_param(format!(
                "audio buffer of {} bytes is not a whole number of sample frames",
                data.len()
            )));
        }
        let needed = self.sync.samples_to_catch_up(
            Rational::from_int(presentation_sector as i64),
            self.samples_written,
        );
        if needed > 0 {
            tracing::debug!(samples = needed, "audio behind, inserting silence");
            self.sink.write_silence(needed as u64)?;
            self.samples_written += needed as u64;
        }
        self.samples_written += (data.len() / self.sink.block_align()) as u64;
        self.sink.write(data)
    }

    /// Total sample frames written, silence included.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

/// One queued frame between the reader and presentation threads.
struct QueuedFrame {
    raster: Vec<u32>,
    presentation_ns: u64,
    frame_number: u32,
}

/// Playback settings.
#[derive(Debug, Clone, Copy)]
pub struct PlayerConfig {
    /// Frame raster dimensions.
    pub width: usize,
    /// Frame raster dimensions.
    pub height: usize,
    /// Disc speed in sectors per second.
    pub sectors_per_second: u32,
    /// Bounded queue depth between reader and presenter.
    pub queue_frames: usize,
}

/// Run the reader and presentation threads until the producer is
/// exhausted or `stop` is set.
///
/// `producer` fills a pooled raster and returns the frame's sector offset
/// from stream start and its frame number, or `None` at end of stream.
/// `renderer` is called on the presentation thread once the frame's time
/// arrives.
pub fn play_video<P, R>(config: PlayerConfig, mut producer: P, mut renderer: R, stop: Arc<AtomicBool>) -> Result<()>
where
    P: FnMut(&mut Vec<u32>) -> Result<Option<(u32, u32)>> + Send,
    R: FnMut(&[u32], u32),
{
    let pool = SharedObjectPool::new({
        let size = config.width * config.height;
        move || vec![0u32; size]
    });
    let (tx, rx): (SyncSender<QueuedFrame>, Receiver<QueuedFrame>) =
        sync_channel(config.queue_frames.max(1));

    thread::scope(|scope| -> Result<()> {
        let reader_pool = pool.clone();
        let reader_stop = Arc::clone(&stop);
        let reader = scope.spawn(move || -> Result<()> {
            loop {
                if reader_stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let mut raster = reader_pool.borrow();
                match producer(&mut raster)? {
                    Some((sector_from_start, frame_number)) => {
                        let presentation_ns = sector_from_start as u64 * 1_000_000_000
                            / config.sectors_per_second as u64;
                        let frame = QueuedFrame {
                            raster,
                            presentation_ns,
                            frame_number,
                        };
                        if tx.send(frame).is_err() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                }
            }
        });

        let start = Instant::now();
        for frame in rx {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let target = Duration::from_nanos(frame.presentation_ns);
            let elapsed = start.elapsed();
            if target > elapsed {
                thread::sleep(target - elapsed);
            }
            renderer(&frame.raster, frame.frame_number);
            pool.give_back(frame.raster);
        }

        match reader.join() {
            Ok(result) => result,
            Err(_) => Err(Error::invalid_param("reader thread panicked".to_string())),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink {
        bytes: usize,
        silence: u64,
    }

    impl AudioSink for CountingSink {
        fn write(&mut self, pcm: &[u8]) -> Result<()> {
            self.bytes += pcm.len();
            Ok(())
        }

        fn write_silence(&mut self, sample_frames: u64) -> Result<()> {
            self.silence += sample_frames;
            Ok(())
        }

        fn block_align(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_audio_pump_inserts_silence_on_gap() {
        let sink = CountingSink { bytes: 0, silence: 0 };
        let mut pump = SectorTimedAudioPump::new(sink, 0, 150, 150);
        // sector 0: on time, 10 sample frames
        pump.write(&[0u8; 40], 0).unwrap();
        // sector 20 is 20 samples in; 10 written, so 10 silence first
        pump.write(&[0u8; 40], 20).unwrap();
        assert_eq!(pump.sink.silence, 10);
        assert_eq!(pump.samples_written(), 30);
    }

    #[test]
    fn test_play_video_renders_in_order_and_reuses_rasters() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut produced = 0u32;
        let rendered = std::sync::Mutex::new(Vec::new());
        play_video(
            PlayerConfig {
                width: 4,
                height: 4,
                sectors_per_second: 150_000, // keep the test fast
                queue_frames: 2,
            },
            move |raster| {
                if produced == 5 {
                    return Ok(None);
                }
                raster.fill(produced);
                let out = (produced * 10, produced);
                produced += 1;
                Ok(Some(out))
            },
            |raster, frame_number| {
                assert!(raster.iter().all(|&p| p == frame_number));
                rendered.lock().unwrap().push(frame_number);
            },
            stop,
        )
        .unwrap();
        assert_eq!(*rendered.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_play_video_stop_flag() {
        let stop = Arc::new(AtomicBool::new(true));
        play_video(
            PlayerConfig {
                width: 2,
                height: 2,
                sectors_per_second: 150,
                queue_frames: 1,
            },
            |_raster| Ok(Some((0, 0))),
            |_, _| panic!("must not render after stop"),
            stop,
        )
        .unwrap();
    }
}
