//! The sector-by-sector pipeline driver.
//!
//! Pulls sectors in strictly increasing order, hands each to the frame
//! demuxer and the audio decoder, and polls for cancellation. When the
//! demuxer and the audio decoder are the same object (Crusader), each
//! sector is fed exactly once.

use strdec_core::error::{Error, Result};
use strdec_core::sector::{IdentifiedSector, Sector, SectorReader};

use crate::demux::{CrusaderDemuxer, DecodedAudio, DemuxedFrame, SectorAudioDecoder, StrFrameDemuxer};
use crate::progress::ProgressLogger;

/// The stream objects a run feeds.
pub enum DriverStreams<'a> {
    /// STR-style video with optional separate audio.
    Separate {
        /// The frame demuxer.
        demuxer: &'a mut StrFrameDemuxer,
        /// The audio decoder, when audio is being saved.
        audio: Option<&'a mut dyn SectorAudioDecoder>,
    },
    /// Crusader movies: demuxer and audio decoder are one object.
    Combined {
        /// The combined demuxer.
        demuxer: &'a mut CrusaderDemuxer,
    },
}

/// Drives one stream's sector range through the pipeline.
pub struct PipelineDriver {
    start_sector: u32,
    end_sector: u32,
}

impl PipelineDriver {
    /// Create a driver over an inclusive sector range.
    pub fn new(start_sector: u32, end_sector: u32) -> Self {
        Self {
            start_sector,
            end_sector,
        }
    }

    /// Run the range to completion, or until cancellation or a stream
    /// failure.
    pub fn run(
        &self,
        reader: &mut dyn SectorReader,
        identify: &mut dyn FnMut(&Sector) -> IdentifiedSector,
        streams: &mut DriverStreams<'_>,
        on_frame: &mut dyn FnMut(DemuxedFrame) -> Result<()>,
        on_audio: &mut dyn FnMut(DecodedAudio) -> Result<()>,
        progress: &mut dyn ProgressLogger,
    ) -> Result<()> {
        let total = (self.end_sector - self.start_sector + 1) as f64;
        for number in self.start_sector..=self.end_sector {
            if progress.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let sector = reader.sector(number)?;
            let identified = identify(&sector);

            match streams {
                DriverStreams::Separate { demuxer, audio } => {
                    if let IdentifiedSector::StrVideo(video) = &identified {
                        demuxer.feed_sector(video, on_frame)?;
                    }
                    if let Some(audio) = audio {
                        for buffer in audio.feed_sector(&identified)? {
                            on_audio(buffer)?;
                        }
                    }
                }
                DriverStreams::Combined { demuxer } => {
                    if let IdentifiedSector::CrusaderAv(av) = &identified {
                        for buffer in demuxer.feed_sector(av, on_frame)? {
                            on_audio(buffer)?;
                        }
                    }
                }
            }
            progress.progress((number - self.start_sector + 1) as f64 / total);
        }

        if let DriverStreams::Separate { demuxer, .. } = streams {
            demuxer.flush(on_frame)?;
        }
        Ok(())
    }
}
