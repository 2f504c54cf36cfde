//! Decoder, filter and writer elements.

use crate::bus::AudioInfo;
use crate::downmix::DownmixEngine;
use crate::element::{AudioElement, AudioFrame, ElementConfig, ElementContext, ElementKind, Flow};
use crate::error::{Result, TonemixError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Stands in for the compressed-audio decoder: frames are already PCM.
#[derive(Debug, Default)]
pub struct PassthroughDecoder {
    current: Option<AudioInfo>,
}

impl PassthroughDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioElement for PassthroughDecoder {
    fn kind(&self) -> ElementKind {
        ElementKind::Decoder
    }

    fn info(&self) -> Option<AudioInfo> {
        self.current
    }

    fn process(&mut self, input: Option<AudioFrame>, _ctx: &ElementContext) -> Result<Flow> {
        match input {
            Some(frame) => {
                self.current = Some(AudioInfo::new(frame.sample_rate, 16, frame.channels));
                Ok(Flow::Emit(frame))
            }
            None => Ok(Flow::Skip),
        }
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

/// Converts a stream to the output rate and channel count.
///
/// The source format is whatever was last configured, not what the frame
/// claims; the link reports its format out of band. Conversion is
/// nearest-sample for rate and averaging/duplication for channels.
#[derive(Debug)]
pub struct Resampler {
    src_rate: u32,
    src_channels: u16,
    dst_rate: u32,
    dst_channels: u16,
}

impl Resampler {
    pub fn new(src_rate: u32, src_channels: u16, dst_rate: u32, dst_channels: u16) -> Self {
        Self {
            src_rate,
            src_channels,
            dst_rate,
            dst_channels,
        }
    }

    pub fn source(&self) -> (u32, u16) {
        (self.src_rate, self.src_channels)
    }

    fn convert(&self, samples: &[i16]) -> Vec<i16> {
        let src_ch = self.src_channels.max(1) as usize;
        let dst_ch = self.dst_channels.max(1) as usize;
        let in_frames = samples.len() / src_ch;
        let out_frames = if self.src_rate == self.dst_rate || self.src_rate == 0 {
            in_frames
        } else {
            (in_frames as u64 * self.dst_rate as u64 / self.src_rate as u64) as usize
        };

        let mut out = Vec::with_capacity(out_frames * dst_ch);
        for i in 0..out_frames {
            let src_frame = if out_frames == in_frames {
                i
            } else {
                ((i as u64 * self.src_rate as u64 / self.dst_rate as u64) as usize)
                    .min(in_frames.saturating_sub(1))
            };
            let frame = &samples[src_frame * src_ch..(src_frame + 1) * src_ch];
            for c in 0..dst_ch {
                let value = if dst_ch == 1 && src_ch > 1 {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / src_ch as i32) as i16
                } else {
                    frame[c.min(src_ch - 1)]
                };
                out.push(value);
            }
        }
        out
    }
}

impl AudioElement for Resampler {
    fn kind(&self) -> ElementKind {
        ElementKind::Filter
    }

    fn configure(&mut self, config: &ElementConfig) -> Result<()> {
        match config {
            ElementConfig::SourceFormat {
                sample_rate,
                channels,
            } => {
                self.src_rate = *sample_rate;
                self.src_channels = *channels;
                Ok(())
            }
            other => Err(TonemixError::UnsupportedConfig {
                element: self.kind().to_string(),
                config: other.to_string(),
            }),
        }
    }

    fn info(&self) -> Option<AudioInfo> {
        Some(AudioInfo::new(self.dst_rate, 16, self.dst_channels))
    }

    fn process(&mut self, input: Option<AudioFrame>, _ctx: &ElementContext) -> Result<Flow> {
        match input {
            Some(frame) => Ok(Flow::Emit(AudioFrame::new(
                self.convert(&frame.samples),
                self.dst_rate,
                self.dst_channels,
            ))),
            None => Ok(Flow::Skip),
        }
    }
}

/// Terminal element of a source pipeline; its output is the ring buffer
/// bound to a downmix slot.
#[derive(Debug, Default)]
pub struct RawWriter {
    current: Option<AudioInfo>,
}

impl RawWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioElement for RawWriter {
    fn kind(&self) -> ElementKind {
        ElementKind::Writer
    }

    fn info(&self) -> Option<AudioInfo> {
        self.current
    }

    fn process(&mut self, input: Option<AudioFrame>, _ctx: &ElementContext) -> Result<Flow> {
        match input {
            Some(frame) => {
                self.current = Some(AudioInfo::new(frame.sample_rate, 16, frame.channels));
                Ok(Flow::Emit(frame))
            }
            None => Ok(Flow::Skip),
        }
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

/// Head of the mix pipeline: one downmix tick per iteration.
pub struct MixerStage {
    engine: Arc<DownmixEngine>,
}

impl MixerStage {
    pub fn new(engine: Arc<DownmixEngine>) -> Self {
        Self { engine }
    }
}

impl AudioElement for MixerStage {
    fn kind(&self) -> ElementKind {
        ElementKind::Filter
    }

    fn info(&self) -> Option<AudioInfo> {
        Some(self.engine.output_info())
    }

    fn process(&mut self, _input: Option<AudioFrame>, _ctx: &ElementContext) -> Result<Flow> {
        let tick = self.engine.mix_tick()?;
        Ok(Flow::Emit(tick.frame))
    }
}

/// Final output: plays frames in real time.
///
/// There is no device behind it; holding each frame for its duration is
/// what paces the whole graph.
#[derive(Debug)]
pub struct OutputSink {
    played: Arc<AtomicU64>,
    realtime: bool,
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink {
    pub fn new() -> Self {
        Self {
            played: Arc::new(AtomicU64::new(0)),
            realtime: true,
        }
    }

    /// Consume frames as fast as they arrive (tests).
    pub fn unpaced() -> Self {
        Self {
            played: Arc::new(AtomicU64::new(0)),
            realtime: false,
        }
    }

    /// Counter of frames played, readable while the sink runs.
    pub fn played_counter(&self) -> Arc<AtomicU64> {
        self.played.clone()
    }
}

impl AudioElement for OutputSink {
    fn kind(&self) -> ElementKind {
        ElementKind::Writer
    }

    fn info(&self) -> Option<AudioInfo> {
        None
    }

    fn process(&mut self, input: Option<AudioFrame>, _ctx: &ElementContext) -> Result<Flow> {
        if let Some(frame) = input {
            if self.realtime {
                thread::sleep(Duration::from_millis(frame.duration_ms()));
            }
            self.played.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Flow::Skip)
    }
}
