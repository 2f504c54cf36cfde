//! Thread-per-element pipeline.

use crate::bus::{AudioInfo, EventPoster, SourceId};
use crate::element::runner::{RunContext, SharedElement};
use crate::element::{AudioElement, ElementConfig, ElementContext, ElementRunner, RingBuffer};
use crate::error::{Result, TonemixError};
use crate::pipeline::{AudioPipeline, PipelinePhase, StopWait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const WAIT_POLL: Duration = Duration::from_millis(5);
const DEFAULT_LINK_CAPACITY: usize = 4;

struct Registered {
    name: String,
    id: SourceId,
    element: SharedElement,
}

/// Runs each element on its own worker, connected by bounded queues.
///
/// The queues between elements are created fresh on every run; the output
/// ring buffer is created once and outlives every run so the consumer
/// bound to it never has to be rebound.
pub struct StagePipeline {
    name: String,
    elements: Vec<Registered>,
    order: Vec<usize>,
    output: RingBuffer,
    link_capacity: usize,
    events: Option<EventPoster>,
    phase: PipelinePhase,
    epoch: u64,
    stop: Arc<AtomicBool>,
    runners: Vec<ElementRunner>,
}

impl StagePipeline {
    pub fn new(name: &str, ring_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            elements: Vec::new(),
            order: Vec::new(),
            output: RingBuffer::new(ring_capacity),
            link_capacity: DEFAULT_LINK_CAPACITY,
            events: None,
            phase: PipelinePhase::Idle,
            epoch: 0,
            stop: Arc::new(AtomicBool::new(false)),
            runners: Vec::new(),
        }
    }

    /// Capacity of the queues between consecutive elements.
    pub fn with_link_capacity(mut self, capacity: usize) -> Self {
        self.link_capacity = capacity.max(1);
        self
    }

    fn invalid(&self, operation: &'static str) -> TonemixError {
        TonemixError::InvalidPhase {
            pipeline: self.name.clone(),
            operation,
            phase: self.phase.to_string(),
        }
    }

    fn find(&self, element: &str) -> Result<&Registered> {
        self.elements
            .iter()
            .find(|r| r.name == element)
            .ok_or_else(|| TonemixError::UnknownElement {
                pipeline: self.name.clone(),
                element: element.to_string(),
            })
    }

    fn index_of(&self, element: &str) -> Option<usize> {
        self.elements.iter().position(|r| r.name == element)
    }
}

impl AudioPipeline for StagePipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, element: Box<dyn AudioElement>, name: &str) -> Result<SourceId> {
        if self.phase != PipelinePhase::Idle {
            return Err(self.invalid("register elements"));
        }
        if self.index_of(name).is_some() {
            return Err(TonemixError::DuplicateElement {
                pipeline: self.name.clone(),
                element: name.to_string(),
            });
        }
        let id = SourceId::allocate();
        self.elements.push(Registered {
            name: name.to_string(),
            id,
            element: Arc::new(Mutex::new(element)),
        });
        debug!(pipeline = %self.name, element = name, %id, "element registered");
        Ok(id)
    }

    fn link(&mut self, order: &[&str]) -> Result<()> {
        if !matches!(self.phase, PipelinePhase::Idle | PipelinePhase::Ready) {
            return Err(self.invalid("link"));
        }
        if order.is_empty() {
            return Err(TonemixError::LinkFailed {
                pipeline: self.name.clone(),
                message: "no elements to link".to_string(),
            });
        }

        let mut indices = Vec::with_capacity(order.len());
        for name in order {
            let idx = self
                .index_of(name)
                .ok_or_else(|| TonemixError::UnknownElement {
                    pipeline: self.name.clone(),
                    element: name.to_string(),
                })?;
            if indices.contains(&idx) {
                return Err(TonemixError::LinkFailed {
                    pipeline: self.name.clone(),
                    message: format!("'{}' appears twice", name),
                });
            }
            indices.push(idx);
        }

        self.order = indices;
        self.phase = PipelinePhase::Ready;
        debug!(pipeline = %self.name, order = ?order, "pipeline linked");
        Ok(())
    }

    fn set_event_listener(&mut self, events: EventPoster) {
        self.events = Some(events);
    }

    fn run(&mut self) -> Result<()> {
        if self.phase != PipelinePhase::Ready {
            return Err(self.invalid("run"));
        }

        self.epoch += 1;
        self.stop = Arc::new(AtomicBool::new(false));

        let mut upstream = None;
        for (pos, &idx) in self.order.iter().enumerate() {
            let is_last = pos + 1 == self.order.len();
            let (output, next) = if is_last {
                (self.output.writer(), None)
            } else {
                let (tx, rx) = bounded(self.link_capacity);
                (tx, Some(rx))
            };

            let registered = &self.elements[idx];
            self.runners.push(ElementRunner::spawn(
                registered.element.clone(),
                RunContext {
                    ctx: ElementContext::new(&registered.name, registered.id, self.events.clone()),
                    input: upstream.take(),
                    output: Some(output),
                    stop: self.stop.clone(),
                    events: self.events.clone(),
                    epoch: self.epoch,
                },
            ));
            upstream = next;
        }

        self.phase = PipelinePhase::Running;
        info!(pipeline = %self.name, epoch = self.epoch, "pipeline running");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.phase {
            PipelinePhase::Running => {
                self.stop.store(true, Ordering::SeqCst);
                self.phase = PipelinePhase::Stopping;
                debug!(pipeline = %self.name, "stop signalled");
                Ok(())
            }
            PipelinePhase::Idle => Err(self.invalid("stop")),
            _ => Ok(()),
        }
    }

    fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<StopWait> {
        if !matches!(self.phase, PipelinePhase::Running | PipelinePhase::Stopping) {
            return Ok(StopWait::Stopped);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.runners.iter().all(ElementRunner::is_finished) {
                self.phase = PipelinePhase::Stopped;
                return Ok(StopWait::Stopped);
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                let pending: Vec<&str> = self
                    .runners
                    .iter()
                    .filter(|r| !r.is_finished())
                    .map(ElementRunner::name)
                    .collect();
                warn!(pipeline = %self.name, ?pending, "elements did not acknowledge stop");
                return Ok(StopWait::TimedOut);
            }
            thread::sleep(WAIT_POLL);
        }
    }

    fn terminate(&mut self) -> Result<()> {
        match self.phase {
            PipelinePhase::Idle | PipelinePhase::Ready | PipelinePhase::Terminated => {
                return Ok(());
            }
            _ => {}
        }

        self.stop.store(true, Ordering::SeqCst);
        for runner in self.runners.drain(..) {
            if runner.is_finished() {
                if let Err(msg) = runner.join() {
                    warn!(pipeline = %self.name, "{}", msg);
                }
            } else {
                // Dropping the handle detaches the worker; it exits on the
                // stop flag and its late report carries a stale epoch.
                warn!(
                    pipeline = %self.name,
                    element = runner.name(),
                    "detaching element that never stopped"
                );
            }
        }

        self.phase = PipelinePhase::Terminated;
        debug!(pipeline = %self.name, "pipeline terminated");
        Ok(())
    }

    fn reset_ring_buffers(&mut self) -> Result<()> {
        if matches!(self.phase, PipelinePhase::Running | PipelinePhase::Stopping) {
            return Err(self.invalid("reset ring buffers"));
        }
        let dropped = self.output.drain();
        debug!(pipeline = %self.name, dropped, "ring buffers reset");
        Ok(())
    }

    fn reset_elements(&mut self) -> Result<()> {
        if !matches!(
            self.phase,
            PipelinePhase::Idle | PipelinePhase::Ready | PipelinePhase::Terminated
        ) {
            return Err(self.invalid("reset elements"));
        }
        for registered in &self.elements {
            registered
                .element
                .lock()
                .map_err(|_| TonemixError::poisoned(&registered.name))?
                .reset();
        }
        if self.phase == PipelinePhase::Terminated {
            self.phase = PipelinePhase::Ready;
        }
        Ok(())
    }

    fn configure(&mut self, element: &str, config: ElementConfig) -> Result<()> {
        let registered = self.find(element)?;
        let mut el = registered
            .element
            .lock()
            .map_err(|_| TonemixError::poisoned(element))?;
        el.configure(&config).map_err(|e| match e {
            TonemixError::UnsupportedConfig { config, .. } => TonemixError::UnsupportedConfig {
                element: element.to_string(),
                config,
            },
            other => other,
        })
    }

    fn element_info(&self, element: &str) -> Result<Option<AudioInfo>> {
        let registered = self.find(element)?;
        let el = registered
            .element
            .lock()
            .map_err(|_| TonemixError::poisoned(element))?;
        Ok(el.info())
    }

    fn output_ring_buffer(&self) -> RingBuffer {
        self.output.clone()
    }

    fn source_id(&self, element: &str) -> Option<SourceId> {
        self.find(element).ok().map(|r| r.id)
    }

    fn phase(&self) -> PipelinePhase {
        self.phase
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for StagePipeline {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PassthroughDecoder, RawWriter};

    fn linked() -> StagePipeline {
        let mut pipeline = StagePipeline::new("test", 4);
        pipeline
            .register(Box::new(PassthroughDecoder::new()), "decoder")
            .unwrap();
        pipeline
            .register(Box::new(RawWriter::new()), "raw")
            .unwrap();
        pipeline.link(&["decoder", "raw"]).unwrap();
        pipeline
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut pipeline = StagePipeline::new("test", 4);
        pipeline
            .register(Box::new(RawWriter::new()), "raw")
            .unwrap();
        let result = pipeline.register(Box::new(RawWriter::new()), "raw");
        assert!(matches!(
            result,
            Err(TonemixError::DuplicateElement { .. })
        ));
    }

    #[test]
    fn test_link_rejects_unknown_element() {
        let mut pipeline = StagePipeline::new("test", 4);
        pipeline
            .register(Box::new(RawWriter::new()), "raw")
            .unwrap();
        let result = pipeline.link(&["decoder", "raw"]);
        assert!(matches!(result, Err(TonemixError::UnknownElement { .. })));
        assert_eq!(pipeline.phase(), PipelinePhase::Idle);
    }

    #[test]
    fn test_link_rejects_repeated_element() {
        let mut pipeline = StagePipeline::new("test", 4);
        pipeline
            .register(Box::new(RawWriter::new()), "raw")
            .unwrap();
        assert!(matches!(
            pipeline.link(&["raw", "raw"]),
            Err(TonemixError::LinkFailed { .. })
        ));
    }

    #[test]
    fn test_link_makes_pipeline_ready() {
        let pipeline = linked();
        assert_eq!(pipeline.phase(), PipelinePhase::Ready);
        assert_eq!(pipeline.epoch(), 0);
    }

    #[test]
    fn test_run_requires_ready() {
        let mut pipeline = StagePipeline::new("test", 4);
        match pipeline.run() {
            Err(TonemixError::InvalidPhase {
                operation, phase, ..
            }) => {
                assert_eq!(operation, "run");
                assert_eq!(phase, "idle");
            }
            other => panic!("Expected InvalidPhase, got {:?}", other),
        }
    }

    #[test]
    fn test_second_run_without_teardown_is_refused() {
        let mut pipeline = linked();
        pipeline.run().unwrap();
        assert!(matches!(
            pipeline.run(),
            Err(TonemixError::InvalidPhase { .. })
        ));
        pipeline.stop().unwrap();
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_full_cycle_returns_to_ready() {
        let mut pipeline = linked();
        pipeline.run().unwrap();
        assert_eq!(pipeline.phase(), PipelinePhase::Running);

        pipeline.stop().unwrap();
        assert_eq!(pipeline.phase(), PipelinePhase::Stopping);
        assert_eq!(
            pipeline
                .wait_for_stop(Some(Duration::from_secs(5)))
                .unwrap(),
            StopWait::Stopped
        );
        assert_eq!(pipeline.phase(), PipelinePhase::Stopped);

        pipeline.terminate().unwrap();
        assert_eq!(pipeline.phase(), PipelinePhase::Terminated);
        pipeline.reset_ring_buffers().unwrap();
        pipeline.reset_elements().unwrap();
        assert_eq!(pipeline.phase(), PipelinePhase::Ready);

        pipeline.run().unwrap();
        assert_eq!(pipeline.epoch(), 2);
        pipeline.stop().unwrap();
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_reset_refused_while_running() {
        let mut pipeline = linked();
        pipeline.run().unwrap();
        assert!(pipeline.reset_elements().is_err());
        assert!(pipeline.reset_ring_buffers().is_err());
        pipeline.stop().unwrap();
        pipeline.terminate().unwrap();
    }

    #[test]
    fn test_configure_reports_element_name() {
        let mut pipeline = linked();
        match pipeline.configure("raw", ElementConfig::SourceUri("flash://x".to_string())) {
            Err(TonemixError::UnsupportedConfig { element, .. }) => assert_eq!(element, "raw"),
            other => panic!("Expected UnsupportedConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_source_ids_are_per_element() {
        let pipeline = linked();
        let decoder = pipeline.source_id("decoder").unwrap();
        let raw = pipeline.source_id("raw").unwrap();
        assert_ne!(decoder, raw);
        assert!(pipeline.source_id("missing").is_none());
    }

    #[test]
    fn test_output_ring_is_stable() {
        let pipeline = linked();
        assert!(
            pipeline
                .output_ring_buffer()
                .same_buffer(&pipeline.output_ring_buffer())
        );
    }
}
