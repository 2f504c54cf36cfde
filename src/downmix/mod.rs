//! Downmix control surface.
//!
//! The orchestrator only ever talks to a [`DownmixControl`]; the engine that
//! actually blends samples ([`engine::DownmixEngine`]) and the recording
//! double used in tests ([`mock::MockDownmix`]) both sit behind it.

pub mod engine;
pub mod mock;

pub use engine::{DownmixEngine, MixTick};
pub use mock::{DownmixCall, MockDownmix};

use crate::element::RingBuffer;
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One of the two downmix inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSlot {
    Base = 0,
    Announcement = 1,
}

impl SourceSlot {
    pub const ALL: [SourceSlot; 2] = [SourceSlot::Base, SourceSlot::Announcement];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSlot::Base => f.write_str("base"),
            SourceSlot::Announcement => f.write_str("announcement"),
        }
    }
}

/// Gain ramp for one slot: `start_db` to `end_db` over `transition_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GainPlan {
    pub start_db: f32,
    pub end_db: f32,
    pub transition_ms: u32,
}

impl GainPlan {
    pub fn new(start_db: f32, end_db: f32, transition_ms: u32) -> Self {
        Self {
            start_db,
            end_db,
            transition_ms,
        }
    }

    /// Flat 0 dB, no ramp.
    pub fn unity() -> Self {
        Self::new(0.0, 0.0, 0)
    }

    /// The pair armed for an announcement: base ducks to `duck_db` while the
    /// announcement rises from it to 0 dB. Returns `(base, announcement)`.
    pub fn crossfade(duck_db: f32, transition_ms: u32) -> (GainPlan, GainPlan) {
        (
            GainPlan::new(0.0, duck_db, transition_ms),
            GainPlan::new(duck_db, 0.0, transition_ms),
        )
    }

    /// True if `other` ramps the opposite way over the same duration.
    pub fn complements(&self, other: &GainPlan) -> bool {
        self.start_db == other.end_db
            && self.end_db == other.start_db
            && self.transition_ms == other.transition_ms
    }

    /// Linear factor for the settled end of the ramp.
    pub fn end_gain(&self) -> f32 {
        10f32.powf(self.end_db / 20.0)
    }
}

/// Coarse engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    /// Base passes through; announcement slot inactive.
    Bypass,
    /// Both slots mixed per their gain plans.
    SwitchOn,
    /// Mixing disengaged; base resumes unmixed.
    SwitchOff,
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkMode::Bypass => f.write_str("bypass"),
            WorkMode::SwitchOn => f.write_str("switch-on"),
            WorkMode::SwitchOff => f.write_str("switch-off"),
        }
    }
}

/// Knob state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownmixSnapshot {
    pub mode: WorkMode,
    pub timeouts: [Duration; 2],
    pub plans: [GainPlan; 2],
    pub bound: [bool; 2],
}

impl DownmixSnapshot {
    pub fn timeout(&self, slot: SourceSlot) -> Duration {
        self.timeouts[slot.index()]
    }

    /// Outside SWITCH_ON the announcement slot contributes nothing, so it
    /// must not make the mix wait.
    pub fn idle_slot_is_nonblocking(&self) -> bool {
        self.mode == WorkMode::SwitchOn || self.timeout(SourceSlot::Announcement).is_zero()
    }
}

/// Runtime knobs of the downmix engine.
///
/// Implementations use interior mutability: the mixing worker reads the
/// state concurrently with the orchestrator changing it.
pub trait DownmixControl: Send + Sync {
    /// Binds a slot to its producer's ring buffer, once.
    fn bind_source(&self, slot: SourceSlot, ring: RingBuffer) -> Result<()>;

    /// Stages a ramp for the slot; it takes effect at the next engagement.
    fn set_gain_plan(&self, slot: SourceSlot, plan: GainPlan) -> Result<()>;

    /// Atomic with respect to the mixing tick.
    fn set_work_mode(&self, mode: WorkMode) -> Result<()>;

    /// How long a tick may wait on the slot. Zero never blocks.
    fn set_admission_timeout(&self, slot: SourceSlot, timeout: Duration) -> Result<()>;

    /// The ring buffer bound to the slot, if any.
    fn source_ring(&self, slot: SourceSlot) -> Option<RingBuffer>;

    fn snapshot(&self) -> Result<DownmixSnapshot>;
}
