//! Two-slot downmix engine.

use crate::bus::AudioInfo;
use crate::defaults;
use crate::downmix::{DownmixControl, DownmixSnapshot, GainPlan, SourceSlot, WorkMode};
use crate::element::{AudioFrame, RingBuffer};
use crate::error::{Result, TonemixError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

struct EngineState {
    mode: WorkMode,
    rings: [Option<RingBuffer>; 2],
    staged: [GainPlan; 2],
    active: [GainPlan; 2],
    timeouts: [Duration; 2],
}

/// Output of one mixing tick.
#[derive(Debug, Clone, PartialEq)]
pub struct MixTick {
    pub frame: AudioFrame,
    /// Which slots delivered a frame this tick.
    pub contributed: [bool; 2],
}

/// Blends the base and announcement slots into one output stream.
///
/// All knob changes go through one mutex. A tick copies what it needs while
/// holding it and reads the slots after releasing it, so a knob change lands
/// either wholly before or wholly after any given tick.
pub struct DownmixEngine {
    state: Mutex<EngineState>,
    output: AudioInfo,
    frame_samples: usize,
}

impl DownmixEngine {
    /// `output` is the mixed stream's format; a silent tick is `frame_ms` long.
    pub fn new(output: AudioInfo, frame_ms: u32) -> Self {
        Self {
            state: Mutex::new(EngineState {
                mode: WorkMode::Bypass,
                rings: [None, None],
                staged: [GainPlan::unity(); 2],
                active: [GainPlan::unity(); 2],
                timeouts: [Duration::ZERO; 2],
            }),
            output,
            frame_samples: defaults::frame_samples(output.sample_rate, output.channels, frame_ms)
                .max(1),
        }
    }

    pub fn output_info(&self) -> AudioInfo {
        self.output
    }

    /// Samples in a silent tick.
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| TonemixError::poisoned("downmix engine state"))
    }

    /// Produces one output frame.
    pub fn mix_tick(&self) -> Result<MixTick> {
        let (mode, rings, gains, timeouts) = {
            let state = self.lock()?;
            (
                state.mode,
                state.rings.clone(),
                [state.active[0].end_gain(), state.active[1].end_gain()],
                state.timeouts,
            )
        };

        let read = |slot: SourceSlot| {
            rings[slot.index()]
                .as_ref()
                .and_then(|ring| ring.read(timeouts[slot.index()]))
        };

        let mut inputs: [Option<(AudioFrame, f32)>; 2] = [None, None];
        match mode {
            WorkMode::Bypass | WorkMode::SwitchOff => {
                inputs[0] = read(SourceSlot::Base).map(|f| (f, 1.0));
            }
            WorkMode::SwitchOn => {
                for slot in SourceSlot::ALL {
                    inputs[slot.index()] = read(slot).map(|f| (f, gains[slot.index()]));
                }
            }
        }

        let contributed = [inputs[0].is_some(), inputs[1].is_some()];
        let len = inputs
            .iter()
            .flatten()
            .map(|(frame, _)| frame.samples.len())
            .max()
            .unwrap_or(self.frame_samples);

        let mut acc = vec![0i32; len];
        for (frame, gain) in inputs.iter().flatten() {
            for (sum, &sample) in acc.iter_mut().zip(frame.samples.iter()) {
                *sum += (sample as f32 * gain).round() as i32;
            }
        }
        let samples = acc
            .into_iter()
            .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .collect();

        trace!(?mode, ?contributed, "mix tick");
        Ok(MixTick {
            frame: AudioFrame::new(samples, self.output.sample_rate, self.output.channels),
            contributed,
        })
    }
}

impl DownmixControl for DownmixEngine {
    fn bind_source(&self, slot: SourceSlot, ring: RingBuffer) -> Result<()> {
        let mut state = self.lock()?;
        let entry = &mut state.rings[slot.index()];
        if entry.is_some() {
            return Err(TonemixError::SlotAlreadyBound {
                slot: slot.to_string(),
            });
        }
        *entry = Some(ring);
        debug!(%slot, "downmix slot bound");
        Ok(())
    }

    fn set_gain_plan(&self, slot: SourceSlot, plan: GainPlan) -> Result<()> {
        self.lock()?.staged[slot.index()] = plan;
        Ok(())
    }

    fn set_work_mode(&self, mode: WorkMode) -> Result<()> {
        let mut state = self.lock()?;
        if mode == WorkMode::SwitchOn {
            state.active = state.staged;
        }
        if state.mode != mode {
            debug!(from = %state.mode, to = %mode, "downmix work mode");
        }
        state.mode = mode;
        Ok(())
    }

    fn set_admission_timeout(&self, slot: SourceSlot, timeout: Duration) -> Result<()> {
        self.lock()?.timeouts[slot.index()] = timeout;
        Ok(())
    }

    fn source_ring(&self, slot: SourceSlot) -> Option<RingBuffer> {
        self.lock().ok()?.rings[slot.index()].clone()
    }

    fn snapshot(&self) -> Result<DownmixSnapshot> {
        let state = self.lock()?;
        Ok(DownmixSnapshot {
            mode: state.mode,
            timeouts: state.timeouts,
            plans: state.active,
            bound: [state.rings[0].is_some(), state.rings[1].is_some()],
        })
    }
}
