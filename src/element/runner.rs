//! Runs one audio element on a dedicated worker thread.

use crate::bus::{ElementStatus, EventPoster};
use crate::element::{AudioElement, AudioFrame, ElementContext, ElementKind, Flow};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// How often a blocked worker re-checks its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// An element shared between its pipeline (configure/reset) and its worker.
pub type SharedElement = Arc<Mutex<Box<dyn AudioElement>>>;

/// Everything a worker needs for one run.
pub struct RunContext {
    pub ctx: ElementContext,
    pub input: Option<Receiver<AudioFrame>>,
    pub output: Option<Sender<AudioFrame>>,
    pub stop: Arc<AtomicBool>,
    pub events: Option<EventPoster>,
    pub epoch: u64,
}

/// Handle to an element's worker thread.
pub struct ElementRunner {
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl ElementRunner {
    /// Spawns the worker. It reports RUNNING immediately and exactly one of
    /// FINISHED or STOPPED when it exits.
    pub fn spawn(element: SharedElement, run: RunContext) -> Self {
        let name = run.ctx.name.clone();

        let handle = thread::spawn(move || {
            let status = run_element(&element, &run);
            debug!(element = %run.ctx.name, ?status, epoch = run.epoch, "element exited");
            if let Some(events) = &run.events {
                events.status(run.ctx.id, status, run.epoch);
            }
        });

        Self {
            handle: Some(handle),
            name,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Joins the worker. Only blocks if it has not exited yet.
    pub fn join(mut self) -> Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Element '{}' worker panicked", self.name)),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn run_element(element: &SharedElement, run: &RunContext) -> ElementStatus {
    if let Some(events) = &run.events {
        events.status(run.ctx.id, ElementStatus::Running, run.epoch);
    }

    let is_writer = match element.lock() {
        Ok(mut el) => {
            if let Err(e) = el.open() {
                warn!(element = %run.ctx.name, error = %e, "element failed to open");
                return ElementStatus::Stopped;
            }
            el.kind() == ElementKind::Writer
        }
        Err(_) => {
            error!(element = %run.ctx.name, "element lock poisoned");
            return ElementStatus::Stopped;
        }
    };

    loop {
        if run.stop.load(Ordering::SeqCst) {
            return ElementStatus::Stopped;
        }

        let input = match &run.input {
            Some(rx) => match rx.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => Some(frame),
                Err(RecvTimeoutError::Timeout) => continue,
                // Upstream finished and its queue is empty.
                Err(RecvTimeoutError::Disconnected) => {
                    if is_writer && !wait_until_consumed(run) {
                        return ElementStatus::Stopped;
                    }
                    return ElementStatus::Finished;
                }
            },
            None => None,
        };

        let flow = match element.lock() {
            Ok(mut el) => el.process(input, &run.ctx),
            Err(_) => {
                error!(element = %run.ctx.name, "element lock poisoned");
                return ElementStatus::Stopped;
            }
        };

        match flow {
            Ok(Flow::Emit(frame)) => {
                if let Some(tx) = &run.output
                    && !send_until_stopped(tx, frame, &run.stop)
                {
                    return ElementStatus::Stopped;
                }
            }
            Ok(Flow::Skip) => {}
            Ok(Flow::Finished) => return ElementStatus::Finished,
            Err(e) => {
                warn!(element = %run.ctx.name, error = %e, "element failed mid-run");
                return ElementStatus::Stopped;
            }
        }
    }
}

/// A writer is done once its consumer has taken everything it wrote.
/// Returns false if the run was stopped first.
fn wait_until_consumed(run: &RunContext) -> bool {
    let Some(tx) = &run.output else {
        return true;
    };
    while !tx.is_empty() {
        if run.stop.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
    true
}

/// Blocks on a full queue, but gives up as soon as the run is stopped.
fn send_until_stopped(tx: &Sender<AudioFrame>, frame: AudioFrame, stop: &AtomicBool) -> bool {
    let mut frame = frame;
    loop {
        match tx.send_timeout(frame, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                frame = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
