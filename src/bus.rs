//! Event bus shared by pipelines, elements and peripherals.
//!
//! One unbounded crossbeam channel carries every status report in posting
//! order. The orchestrator is its only consumer; everyone else holds an
//! [`EventPoster`]. The channel is unbounded so that an element reporting
//! STOPPED never blocks while the orchestrator itself sits in
//! `wait_for_stop` on that element's pipeline.

use crossbeam_channel::{Receiver, RecvError, Sender, unbounded};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

static NEXT_SOURCE_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of whoever posted an event (an element or a peripheral).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SourceId(u32);

impl SourceId {
    /// Hands out a process-unique identity.
    pub fn allocate() -> Self {
        SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src#{}", self.0)
    }
}

/// Lifecycle status reported by an element's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementStatus {
    Running,
    Stopped,
    Finished,
}

impl ElementStatus {
    /// STOPPED and FINISHED both mean "this stream is over".
    ///
    /// A mid-run fault surfaces the same way, there is no separate path.
    pub fn is_terminal(self) -> bool {
        matches!(self, ElementStatus::Stopped | ElementStatus::Finished)
    }
}

/// Stream format as reported by an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub bits: u16,
    pub channels: u16,
}

impl AudioInfo {
    pub fn new(sample_rate: u32, bits: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits,
            channels,
        }
    }
}

impl fmt::Display for AudioInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz/{} bit/{} ch",
            self.sample_rate, self.bits, self.channels
        )
    }
}

/// Link state change posted by the wireless peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralKind {
    Connected,
    Disconnected,
}

/// Everything that can travel over the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// An element changed lifecycle status during run `epoch` of its pipeline.
    ElementStatus {
        source: SourceId,
        status: ElementStatus,
        epoch: u64,
    },
    /// A reader learned the format of the stream it is producing.
    MusicInfo { source: SourceId, info: AudioInfo },
    /// The wireless link came up or went away.
    Peripheral {
        source: SourceId,
        kind: PeripheralKind,
    },
    /// Ends the event loop.
    Shutdown,
}

/// Errors from [`EventBus::listen`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The event was received but cannot be acted upon; it is dropped.
    #[error("malformed event from {origin}: {reason}")]
    Malformed { origin: SourceId, reason: String },

    /// Every poster is gone.
    #[error("event bus disconnected")]
    Disconnected,
}

impl From<RecvError> for BusError {
    fn from(_: RecvError) -> Self {
        BusError::Disconnected
    }
}

/// Cloneable posting half of the bus.
#[derive(Debug, Clone)]
pub struct EventPoster {
    tx: Sender<BusEvent>,
}

impl EventPoster {
    /// Posts an event. Returns false if the bus is gone.
    pub fn post(&self, event: BusEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn status(&self, source: SourceId, status: ElementStatus, epoch: u64) -> bool {
        self.post(BusEvent::ElementStatus {
            source,
            status,
            epoch,
        })
    }
}

/// The bus itself, owned by its single consumer.
pub struct EventBus {
    tx: Sender<BusEvent>,
    rx: Receiver<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn poster(&self) -> EventPoster {
        EventPoster {
            tx: self.tx.clone(),
        }
    }

    /// Blocks until the next event arrives. There is no implicit timeout.
    pub fn listen(&self) -> Result<BusEvent, BusError> {
        let event = self.rx.recv()?;
        validate(&event)?;
        Ok(event)
    }

    /// Non-blocking variant of [`listen`](Self::listen); `None` when empty.
    pub fn try_listen(&self) -> Option<Result<BusEvent, BusError>> {
        let event = self.rx.try_recv().ok()?;
        Some(validate(&event).map(|()| event))
    }

    /// Number of events waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(event: &BusEvent) -> Result<(), BusError> {
    if let BusEvent::MusicInfo { source, info } = event {
        if info.sample_rate == 0 {
            return Err(BusError::Malformed {
                origin: *source,
                reason: "sample rate is zero".to_string(),
            });
        }
        if info.channels == 0 {
            return Err(BusError::Malformed {
                origin: *source,
                reason: "channel count is zero".to_string(),
            });
        }
    }
    Ok(())
}
