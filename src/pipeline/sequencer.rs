//! Ordered teardown of a running pipeline.
//!
//! The order is fixed: stop, wait for stop, terminate, reset ring buffers,
//! reset elements. Waiting before terminating keeps a late flush from the
//! old run out of the next run's output.

use crate::error::Result;
use crate::pipeline::{AudioPipeline, StopWait};
use std::time::Duration;
use tracing::{debug, warn};

/// Stops the pipeline and leaves it ready to run again.
pub fn teardown(pipeline: &mut dyn AudioPipeline, stop_timeout: Option<Duration>) -> Result<()> {
    shut_down(pipeline, stop_timeout)?;
    pipeline.reset_ring_buffers()?;
    pipeline.reset_elements()?;
    debug!(pipeline = pipeline.name(), "pipeline reset");
    Ok(())
}

/// Stops the pipeline for good: stop, bounded wait, terminate.
///
/// A wait that times out is logged and followed by a forced terminate.
pub fn shut_down(pipeline: &mut dyn AudioPipeline, stop_timeout: Option<Duration>) -> Result<()> {
    pipeline.stop()?;
    if pipeline.wait_for_stop(stop_timeout)? == StopWait::TimedOut {
        warn!(
            pipeline = pipeline.name(),
            timeout_ms = stop_timeout.map(|t| t.as_millis() as u64),
            "stop not acknowledged in time, forcing termination"
        );
    }
    pipeline.terminate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MockPipeline, PipelineCall, PipelinePhase};

    #[test]
    fn test_teardown_runs_steps_in_order() {
        let (mut pipeline, probe) = MockPipeline::new("announcement");
        pipeline.link(&[]).unwrap();
        pipeline.run().unwrap();
        probe.clear_calls();

        teardown(&mut pipeline, Some(Duration::from_secs(1))).unwrap();

        assert_eq!(
            probe.calls(),
            vec![
                PipelineCall::Stop,
                PipelineCall::WaitForStop,
                PipelineCall::Terminate,
                PipelineCall::ResetRingBuffers,
                PipelineCall::ResetElements,
            ]
        );
        assert_eq!(pipeline.phase(), PipelinePhase::Ready);
    }

    #[test]
    fn test_timed_out_wait_still_terminates() {
        let (mut pipeline, probe) = MockPipeline::new("base");
        probe.set_stop_times_out(true);
        pipeline.link(&[]).unwrap();
        pipeline.run().unwrap();
        probe.clear_calls();

        shut_down(&mut pipeline, Some(Duration::from_millis(10))).unwrap();

        assert_eq!(
            probe.calls(),
            vec![
                PipelineCall::Stop,
                PipelineCall::WaitForStop,
                PipelineCall::Terminate
            ]
        );
        assert_eq!(pipeline.phase(), PipelinePhase::Terminated);
    }
}
