//! Audio elements: single processing stages with a uniform lifecycle.
//!
//! An [`AudioElement`] only knows how to configure itself, process one frame
//! and reset. Running it on a worker, stopping it and waiting for it is the
//! job of [`runner::ElementRunner`], the same split as a station and its
//! runner.

pub mod readers;
pub mod ring_buffer;
pub mod runner;
pub mod stages;

pub use readers::{LinkReader, ToneReader};
pub use ring_buffer::RingBuffer;
pub use runner::ElementRunner;
pub use stages::{MixerStage, OutputSink, PassthroughDecoder, RawWriter, Resampler};

use crate::bus::{AudioInfo, BusEvent, EventPoster, SourceId};
use crate::error::{Result, TonemixError};
use std::fmt;

/// A block of interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn silence(len: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0; len], sample_rate, channels)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }
}

/// The role an element plays in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Reader,
    Decoder,
    Filter,
    Writer,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Reader => "reader",
            ElementKind::Decoder => "decoder",
            ElementKind::Filter => "filter",
            ElementKind::Writer => "writer",
        };
        f.write_str(name)
    }
}

/// Runtime parameters an element may accept.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementConfig {
    /// Where a reader should pull its stream from.
    SourceUri(String),
    /// Format of the stream arriving at a filter.
    SourceFormat { sample_rate: u32, channels: u16 },
}

impl fmt::Display for ElementConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementConfig::SourceUri(uri) => write!(f, "source URI {}", uri),
            ElementConfig::SourceFormat {
                sample_rate,
                channels,
            } => write!(f, "source format {} Hz/{} ch", sample_rate, channels),
        }
    }
}

/// What one call to [`AudioElement::process`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Pass this frame downstream.
    Emit(AudioFrame),
    /// Nothing to pass on this iteration.
    Skip,
    /// The stream is over.
    Finished,
}

/// Identity and reporting channel handed to an element while it runs.
pub struct ElementContext {
    pub name: String,
    pub id: SourceId,
    events: Option<EventPoster>,
}

impl ElementContext {
    pub fn new(name: &str, id: SourceId, events: Option<EventPoster>) -> Self {
        Self {
            name: name.to_string(),
            id,
            events,
        }
    }

    /// Tells the bus what format this element is now producing.
    pub fn report_music_info(&self, info: AudioInfo) {
        if let Some(events) = &self.events {
            events.post(BusEvent::MusicInfo {
                source: self.id,
                info,
            });
        }
    }
}

/// A single processing stage.
///
/// Elements with no upstream (readers at the head of a pipeline) get
/// `None` as input on every call and are expected to block briefly or
/// return [`Flow::Skip`] when they have nothing yet.
pub trait AudioElement: Send {
    fn kind(&self) -> ElementKind;

    /// Applies a runtime parameter. Elements reject what they don't understand.
    fn configure(&mut self, config: &ElementConfig) -> Result<()> {
        Err(TonemixError::UnsupportedConfig {
            element: self.kind().to_string(),
            config: config.to_string(),
        })
    }

    /// Format of the stream this element currently produces, if known.
    fn info(&self) -> Option<AudioInfo>;

    /// Called on the worker before the first `process`.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, input: Option<AudioFrame>, ctx: &ElementContext) -> Result<Flow>;

    /// Returns to the pre-run configuration so the element can run again.
    fn reset(&mut self) {}
}
