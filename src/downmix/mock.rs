//! Recording downmix double for orchestrator tests.

use crate::downmix::{DownmixControl, DownmixSnapshot, GainPlan, SourceSlot, WorkMode};
use crate::element::RingBuffer;
use crate::error::{Result, TonemixError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One knob change, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum DownmixCall {
    Bind(SourceSlot),
    GainPlan(SourceSlot, GainPlan),
    WorkMode(WorkMode),
    AdmissionTimeout(SourceSlot, Duration),
}

struct MockState {
    mode: WorkMode,
    timeouts: [Duration; 2],
    staged: [GainPlan; 2],
    active: [GainPlan; 2],
    rings: [Option<RingBuffer>; 2],
    calls: Vec<DownmixCall>,
    history: Vec<DownmixSnapshot>,
}

impl MockState {
    fn snapshot(&self) -> DownmixSnapshot {
        DownmixSnapshot {
            mode: self.mode,
            timeouts: self.timeouts,
            plans: self.active,
            bound: [self.rings[0].is_some(), self.rings[1].is_some()],
        }
    }

    fn record(&mut self, call: DownmixCall) {
        self.calls.push(call);
        let snap = self.snapshot();
        self.history.push(snap);
    }
}

/// Keeps knob state like the real engine but never mixes. Clones share state.
#[derive(Clone)]
pub struct MockDownmix {
    state: Arc<Mutex<MockState>>,
}

impl MockDownmix {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                mode: WorkMode::Bypass,
                timeouts: [Duration::ZERO; 2],
                staged: [GainPlan::unity(); 2],
                active: [GainPlan::unity(); 2],
                rings: [None, None],
                calls: Vec::new(),
                history: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| TonemixError::poisoned("mock downmix"))
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<DownmixCall> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Knob state after each call, aligned with [`calls`](Self::calls).
    pub fn history(&self) -> Vec<DownmixSnapshot> {
        self.lock().map(|s| s.history.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut s) = self.lock() {
            s.calls.clear();
            s.history.clear();
        }
    }

    pub fn mode(&self) -> Option<WorkMode> {
        self.lock().ok().map(|s| s.mode)
    }

    pub fn timeouts(&self) -> Option<[Duration; 2]> {
        self.lock().ok().map(|s| s.timeouts)
    }

    /// The plan staged for the next engagement.
    pub fn staged_plan(&self, slot: SourceSlot) -> Option<GainPlan> {
        self.lock().ok().map(|s| s.staged[slot.index()])
    }
}

impl Default for MockDownmix {
    fn default() -> Self {
        Self::new()
    }
}

impl DownmixControl for MockDownmix {
    fn bind_source(&self, slot: SourceSlot, ring: RingBuffer) -> Result<()> {
        let mut s = self.lock()?;
        if s.rings[slot.index()].is_some() {
            return Err(TonemixError::SlotAlreadyBound {
                slot: slot.to_string(),
            });
        }
        s.rings[slot.index()] = Some(ring);
        s.record(DownmixCall::Bind(slot));
        Ok(())
    }

    fn set_gain_plan(&self, slot: SourceSlot, plan: GainPlan) -> Result<()> {
        let mut s = self.lock()?;
        s.staged[slot.index()] = plan;
        s.record(DownmixCall::GainPlan(slot, plan));
        Ok(())
    }

    fn set_work_mode(&self, mode: WorkMode) -> Result<()> {
        let mut s = self.lock()?;
        if mode == WorkMode::SwitchOn {
            s.active = s.staged;
        }
        s.mode = mode;
        s.record(DownmixCall::WorkMode(mode));
        Ok(())
    }

    fn set_admission_timeout(&self, slot: SourceSlot, timeout: Duration) -> Result<()> {
        let mut s = self.lock()?;
        s.timeouts[slot.index()] = timeout;
        s.record(DownmixCall::AdmissionTimeout(slot, timeout));
        Ok(())
    }

    fn source_ring(&self, slot: SourceSlot) -> Option<RingBuffer> {
        self.lock().ok()?.rings[slot.index()].clone()
    }

    fn snapshot(&self) -> Result<DownmixSnapshot> {
        Ok(self.lock()?.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_calls_in_order() {
        let mock = MockDownmix::new();
        mock.set_admission_timeout(SourceSlot::Announcement, Duration::ZERO)
            .unwrap();
        mock.set_work_mode(WorkMode::SwitchOff).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                DownmixCall::AdmissionTimeout(SourceSlot::Announcement, Duration::ZERO),
                DownmixCall::WorkMode(WorkMode::SwitchOff),
            ]
        );
        assert_eq!(mock.history().len(), 2);
        assert_eq!(mock.mode(), Some(WorkMode::SwitchOff));
    }

    #[test]
    fn test_mock_clones_share_state() {
        let mock = MockDownmix::new();
        let probe = mock.clone();
        mock.set_work_mode(WorkMode::SwitchOn).unwrap();
        assert_eq!(probe.mode(), Some(WorkMode::SwitchOn));
    }

    #[test]
    fn test_mock_rejects_second_binding() {
        let mock = MockDownmix::new();
        mock.bind_source(SourceSlot::Base, RingBuffer::new(1))
            .unwrap();
        assert!(
            mock.bind_source(SourceSlot::Base, RingBuffer::new(1))
                .is_err()
        );
    }

    #[test]
    fn test_mock_promotes_plans_on_engage() {
        let mock = MockDownmix::new();
        let plan = GainPlan::new(0.0, -10.0, 500);
        mock.set_gain_plan(SourceSlot::Base, plan).unwrap();
        assert_eq!(mock.snapshot().unwrap().plans[0], GainPlan::unity());
        assert_eq!(mock.staged_plan(SourceSlot::Base), Some(plan));

        mock.set_work_mode(WorkMode::SwitchOn).unwrap();
        assert_eq!(mock.snapshot().unwrap().plans[0], plan);
    }
}
