//! Pipelines: named chains of audio elements with one aggregate lifecycle.
//!
//! ```text
//! base:          link_reader -> base_filter -> base_raw ─┐
//!                                                        ├─> mixer -> output
//! announcement:  tone_file -> tone_decoder -> tone_filter -> tone_raw ─┘
//! ```

pub mod mock;
pub mod sequencer;
pub mod stage_pipeline;

pub use mock::{MockPipeline, MockPipelineProbe, PipelineCall};
pub use stage_pipeline::StagePipeline;

use crate::bus::{AudioInfo, EventPoster, SourceId};
use crate::element::{AudioElement, ElementConfig, RingBuffer};
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Element names used when wiring the device.
pub mod names {
    pub const LINK_READER: &str = "link";
    pub const BASE_FILTER: &str = "base_filter";
    pub const BASE_RAW: &str = "base_raw";
    pub const TONE_FILE: &str = "tone_file";
    pub const TONE_DECODER: &str = "tone_decoder";
    pub const TONE_FILTER: &str = "tone_filter";
    pub const TONE_RAW: &str = "tone_raw";
    pub const MIXER: &str = "mixer";
    pub const OUTPUT: &str = "output";
}

/// Where a pipeline is in its lifecycle.
///
/// `Idle -> Ready` on link, `Ready -> Running` on run, then
/// `Stopping -> Stopped -> Terminated` and back to `Ready` on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    Ready,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelinePhase::Idle => "idle",
            PipelinePhase::Ready => "ready",
            PipelinePhase::Running => "running",
            PipelinePhase::Stopping => "stopping",
            PipelinePhase::Stopped => "stopped",
            PipelinePhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Outcome of [`AudioPipeline::wait_for_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopWait {
    /// Every element acknowledged.
    Stopped,
    /// The deadline passed with elements still running.
    TimedOut,
}

/// Lifecycle surface of a pipeline.
pub trait AudioPipeline: Send {
    fn name(&self) -> &str;

    /// Adds an element under a unique name. Only before linking.
    fn register(&mut self, element: Box<dyn AudioElement>, name: &str) -> Result<SourceId>;

    /// Fixes the data-flow order, head first.
    fn link(&mut self, order: &[&str]) -> Result<()>;

    /// Where element status reports go.
    fn set_event_listener(&mut self, events: EventPoster);

    /// Starts every element. Only from `Ready`.
    fn run(&mut self) -> Result<()>;

    /// Signals every element to stop. Does not wait.
    fn stop(&mut self) -> Result<()>;

    /// Blocks until every element acknowledged the stop, or the timeout
    /// passes. `None` waits forever.
    fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<StopWait>;

    /// Releases per-run state, detaching any element that never stopped.
    fn terminate(&mut self) -> Result<()>;

    /// Empties the output ring buffer.
    fn reset_ring_buffers(&mut self) -> Result<()>;

    /// Returns every element to its pre-run configuration.
    fn reset_elements(&mut self) -> Result<()>;

    fn configure(&mut self, element: &str, config: ElementConfig) -> Result<()>;

    fn element_info(&self, element: &str) -> Result<Option<AudioInfo>>;

    /// The ring buffer written by the last element. Stable across runs.
    fn output_ring_buffer(&self) -> RingBuffer;

    fn source_id(&self, element: &str) -> Option<SourceId>;

    fn phase(&self) -> PipelinePhase;

    /// Number of runs started so far.
    fn epoch(&self) -> u64;
}
