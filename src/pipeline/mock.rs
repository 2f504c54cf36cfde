//! Recording pipeline double.

use crate::bus::{AudioInfo, EventPoster, SourceId};
use crate::element::{AudioElement, ElementConfig, RingBuffer};
use crate::error::{Result, TonemixError};
use crate::pipeline::{AudioPipeline, PipelinePhase, StopWait};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One lifecycle call, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    Register(String),
    Link(Vec<String>),
    SetEventListener,
    Run,
    Stop,
    WaitForStop,
    Terminate,
    ResetRingBuffers,
    ResetElements,
    Configure(String, ElementConfig),
}

struct MockState {
    phase: PipelinePhase,
    epoch: u64,
    ids: HashMap<String, SourceId>,
    infos: HashMap<String, AudioInfo>,
    calls: Vec<PipelineCall>,
    /// Position of each call in a sequence shared by every mock pipeline.
    stamps: Vec<u64>,
    stop_times_out: bool,
    fail_run: bool,
    events: Option<EventPoster>,
}

static NEXT_STAMP: AtomicU64 = AtomicU64::new(0);

impl MockState {
    fn record(&mut self, call: PipelineCall) {
        self.calls.push(call);
        self.stamps.push(NEXT_STAMP.fetch_add(1, Ordering::SeqCst));
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Follows the same phase rules as [`StagePipeline`](super::StagePipeline)
/// without running anything.
pub struct MockPipeline {
    name: String,
    state: Arc<Mutex<MockState>>,
    output: RingBuffer,
}

/// Shared view into a [`MockPipeline`] after it has been handed away.
#[derive(Clone)]
pub struct MockPipelineProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockPipeline {
    pub fn new(name: &str) -> (Self, MockPipelineProbe) {
        let state = Arc::new(Mutex::new(MockState {
            phase: PipelinePhase::Idle,
            epoch: 0,
            ids: HashMap::new(),
            infos: HashMap::new(),
            calls: Vec::new(),
            stamps: Vec::new(),
            stop_times_out: false,
            fail_run: false,
            events: None,
        }));
        let probe = MockPipelineProbe {
            state: state.clone(),
        };
        (
            Self {
                name: name.to_string(),
                state,
                output: RingBuffer::new(4),
            },
            probe,
        )
    }

    /// A linked pipeline with placeholder elements under `names`.
    pub fn linked(name: &str, names: &[&str]) -> (Self, MockPipelineProbe) {
        let (pipeline, probe) = Self::new(name);
        {
            let mut s = lock(&pipeline.state);
            for element in names {
                s.ids.insert(element.to_string(), SourceId::allocate());
            }
            s.phase = PipelinePhase::Ready;
        }
        (pipeline, probe)
    }

    fn invalid(&self, operation: &'static str, phase: PipelinePhase) -> TonemixError {
        TonemixError::InvalidPhase {
            pipeline: self.name.clone(),
            operation,
            phase: phase.to_string(),
        }
    }
}

impl AudioPipeline for MockPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, _element: Box<dyn AudioElement>, name: &str) -> Result<SourceId> {
        let mut s = lock(&self.state);
        if s.ids.contains_key(name) {
            return Err(TonemixError::DuplicateElement {
                pipeline: self.name.clone(),
                element: name.to_string(),
            });
        }
        let id = SourceId::allocate();
        s.ids.insert(name.to_string(), id);
        s.record(PipelineCall::Register(name.to_string()));
        Ok(id)
    }

    fn link(&mut self, order: &[&str]) -> Result<()> {
        let mut s = lock(&self.state);
        s.record(PipelineCall::Link(
            order.iter().map(|n| n.to_string()).collect(),
        ));
        s.phase = PipelinePhase::Ready;
        Ok(())
    }

    fn set_event_listener(&mut self, events: EventPoster) {
        let mut s = lock(&self.state);
        s.events = Some(events);
        s.record(PipelineCall::SetEventListener);
    }

    fn run(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        if s.phase != PipelinePhase::Ready {
            return Err(self.invalid("run", s.phase));
        }
        if s.fail_run {
            return Err(TonemixError::Other("run refused".to_string()));
        }
        s.epoch += 1;
        s.phase = PipelinePhase::Running;
        s.record(PipelineCall::Run);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        s.record(PipelineCall::Stop);
        if s.phase == PipelinePhase::Running {
            s.phase = PipelinePhase::Stopping;
        }
        Ok(())
    }

    fn wait_for_stop(&mut self, _timeout: Option<Duration>) -> Result<StopWait> {
        let mut s = lock(&self.state);
        s.record(PipelineCall::WaitForStop);
        if !matches!(s.phase, PipelinePhase::Running | PipelinePhase::Stopping) {
            return Ok(StopWait::Stopped);
        }
        if s.stop_times_out {
            return Ok(StopWait::TimedOut);
        }
        s.phase = PipelinePhase::Stopped;
        Ok(StopWait::Stopped)
    }

    fn terminate(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        s.record(PipelineCall::Terminate);
        if !matches!(s.phase, PipelinePhase::Idle | PipelinePhase::Ready) {
            s.phase = PipelinePhase::Terminated;
        }
        Ok(())
    }

    fn reset_ring_buffers(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        if matches!(s.phase, PipelinePhase::Running | PipelinePhase::Stopping) {
            return Err(self.invalid("reset ring buffers", s.phase));
        }
        s.record(PipelineCall::ResetRingBuffers);
        self.output.drain();
        Ok(())
    }

    fn reset_elements(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        if matches!(
            s.phase,
            PipelinePhase::Running | PipelinePhase::Stopping | PipelinePhase::Stopped
        ) {
            return Err(self.invalid("reset elements", s.phase));
        }
        s.record(PipelineCall::ResetElements);
        if s.phase == PipelinePhase::Terminated {
            s.phase = PipelinePhase::Ready;
        }
        Ok(())
    }

    fn configure(&mut self, element: &str, config: ElementConfig) -> Result<()> {
        let mut s = lock(&self.state);
        if !s.ids.contains_key(element) {
            return Err(TonemixError::UnknownElement {
                pipeline: self.name.clone(),
                element: element.to_string(),
            });
        }
        s.record(PipelineCall::Configure(element.to_string(), config));
        Ok(())
    }

    fn element_info(&self, element: &str) -> Result<Option<AudioInfo>> {
        let s = lock(&self.state);
        if !s.ids.contains_key(element) {
            return Err(TonemixError::UnknownElement {
                pipeline: self.name.clone(),
                element: element.to_string(),
            });
        }
        Ok(s.infos.get(element).copied())
    }

    fn output_ring_buffer(&self) -> RingBuffer {
        self.output.clone()
    }

    fn source_id(&self, element: &str) -> Option<SourceId> {
        lock(&self.state).ids.get(element).copied()
    }

    fn phase(&self) -> PipelinePhase {
        lock(&self.state).phase
    }

    fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }
}

impl MockPipelineProbe {
    pub fn calls(&self) -> Vec<PipelineCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        let mut s = lock(&self.state);
        s.calls.clear();
        s.stamps.clear();
    }

    /// Sequence stamps of every `call` made on this pipeline, oldest first.
    /// Stamps from different mock pipelines are comparable.
    pub fn stamps(&self, call: &PipelineCall) -> Vec<u64> {
        let s = lock(&self.state);
        s.calls
            .iter()
            .zip(&s.stamps)
            .filter(|(c, _)| *c == call)
            .map(|(_, stamp)| *stamp)
            .collect()
    }

    pub fn runs(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| **c == PipelineCall::Run)
            .count()
    }

    pub fn phase(&self) -> PipelinePhase {
        lock(&self.state).phase
    }

    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    pub fn source_id(&self, element: &str) -> Option<SourceId> {
        lock(&self.state).ids.get(element).copied()
    }

    /// Every config applied to `element`, oldest first.
    pub fn configs(&self, element: &str) -> Vec<ElementConfig> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                PipelineCall::Configure(name, config) if name == element => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make `wait_for_stop` report a timeout.
    pub fn set_stop_times_out(&self, times_out: bool) {
        lock(&self.state).stop_times_out = times_out;
    }

    /// Make `run` fail.
    pub fn set_fail_run(&self, fail: bool) {
        lock(&self.state).fail_run = fail;
    }

    pub fn set_element_info(&self, element: &str, info: AudioInfo) {
        lock(&self.state).infos.insert(element.to_string(), info);
    }

    /// The listener set on the pipeline, for posting element reports.
    pub fn events(&self) -> Option<EventPoster> {
        lock(&self.state).events.clone()
    }

    /// True if every run after the first was preceded by a complete
    /// stop, wait, terminate, reset sequence.
    pub fn teardown_before_every_rerun(&self) -> bool {
        const TEARDOWN: [PipelineCall; 5] = [
            PipelineCall::Stop,
            PipelineCall::WaitForStop,
            PipelineCall::Terminate,
            PipelineCall::ResetRingBuffers,
            PipelineCall::ResetElements,
        ];

        let calls = lock(&self.state).calls.clone();
        let mut seen_run = false;
        let mut next = 0;
        for call in &calls {
            if *call == PipelineCall::Run {
                if seen_run && next < TEARDOWN.len() {
                    return false;
                }
                seen_run = true;
                next = 0;
            } else if next < TEARDOWN.len() && *call == TEARDOWN[next] {
                next += 1;
            }
        }
        true
    }
}
