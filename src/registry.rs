// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Registered streams and their timeline history, indexed by stream index.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layout::{FrameDescriptor, StreamDescriptor, StreamMedia, StreamTable, MAX_STREAMS};
use crate::timeline::{
    audio_nominal_duration, video_nominal_duration, Rational, Reconstructed, StreamTimeline,
    DEFAULT_FRAME_RATE,
};

/// Static parameters of a registered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Position in the stream table; frames refer to the stream by it.
    pub index: usize,
    pub codec_id: i32,
    /// Native time unit of incoming timestamps.
    pub input_time_base: Rational,
    /// Video or audio parameters (never `Unsupported`).
    pub media: StreamMedia,
}

#[derive(Debug)]
struct Entry {
    info: StreamInfo,
    timeline: StreamTimeline,
}

/// Arena of registered streams. Unsupported streams leave a hole.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    slots: Vec<Option<Entry>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every supported stream of `table`, skipping the rest.
    pub fn from_table(table: &StreamTable) -> Self {
        let mut registry = Self::new();
        for (index, desc) in table.streams.iter().enumerate() {
            if let Err(e) = registry.register(index, desc) {
                warn!(index, error = %e, "skipping stream");
            }
        }
        registry
    }

    /// Register `desc` under `index` with fresh timeline history.
    pub fn register(&mut self, index: usize, desc: &StreamDescriptor) -> Result<&StreamInfo> {
        if index >= MAX_STREAMS {
            return Err(Error::BadStreamIndex(index as i64));
        }
        if desc.index as i64 != index as i64 {
            warn!(index, recorded = desc.index, "stream record index differs from its table position");
        }

        let nominal = match &desc.media {
            StreamMedia::Video(v) => {
                let nominal = video_nominal_duration(DEFAULT_FRAME_RATE);
                info!(
                    index,
                    codec_id = desc.codec_id,
                    time_base = %desc.time_base,
                    pixel_format = v.pixel_format,
                    width = v.width,
                    height = v.height,
                    nominal,
                    "video stream"
                );
                nominal
            }
            StreamMedia::Audio(a) => {
                let nominal = audio_nominal_duration(a.sample_rate);
                info!(
                    index,
                    codec_id = desc.codec_id,
                    time_base = %desc.time_base,
                    sample_rate = a.sample_rate,
                    channels = a.channels,
                    sample_format = a.sample_format,
                    nominal,
                    "audio stream"
                );
                nominal
            }
            StreamMedia::Unsupported { kind } => {
                return Err(Error::UnsupportedStreamKind { index, kind: *kind });
            }
        };

        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        let entry = self.slots[index].insert(Entry {
            info: StreamInfo {
                index,
                codec_id: desc.codec_id,
                input_time_base: desc.time_base,
                media: desc.media.clone(),
            },
            timeline: StreamTimeline::new(desc.time_base, nominal),
        });
        Ok(&entry.info)
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered streams in index order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.slots.iter().flatten().map(|e| &e.info)
    }

    fn entry(&self, index: i64) -> Result<&Entry> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(Option::as_ref)
            .ok_or(Error::BadStreamIndex(index))
    }

    fn entry_mut(&mut self, index: i64) -> Result<&mut Entry> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(Error::BadStreamIndex(index))
    }

    pub fn get(&self, index: i64) -> Result<&StreamInfo> {
        self.entry(index).map(|e| &e.info)
    }

    pub fn timeline(&self, index: i64) -> Result<&StreamTimeline> {
        self.entry(index).map(|e| &e.timeline)
    }

    /// Run the timeline reconstruction for `frame` against its stream.
    pub fn reconstruct(&mut self, frame: &FrameDescriptor) -> Result<Reconstructed> {
        let index = frame.stream_index as i64;
        let timeline = &mut self.entry_mut(index)?.timeline;
        let last_input = timeline.last_input_dts();
        let out = timeline.reconstruct(frame.pts, frame.dts);
        if out.resync {
            warn!(
                index,
                last_dts = last_input,
                dts = timeline.last_input_dts(),
                out_dts = out.dts,
                "input dts step out of range, advancing one nominal duration"
            );
        }
        Ok(out)
    }
}
