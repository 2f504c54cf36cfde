//! tonemix - announcement mixer for a wireless speaker
//!
//! Plays a continuous stream received over a wireless link and ducks it
//! under short announcement tones (ready, connected, disconnected) when the
//! link changes state.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod bus;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod downmix;
pub mod element;
pub mod error;
pub mod link;
pub mod orchestrator;
pub mod pipeline;
pub mod tone;

// Composition root - needs everything
pub mod app;

// Event model
pub use bus::{AudioInfo, BusError, BusEvent, ElementStatus, EventBus, EventPoster, SourceId};

// Core
pub use orchestrator::{ExitReason, Orchestrator, OrchestratorConfig, OrchestratorState, Pipelines};

// Collaborator surfaces
pub use downmix::{DownmixControl, DownmixEngine, GainPlan, SourceSlot, WorkMode};
pub use element::AudioElement;
pub use pipeline::{AudioPipeline, StagePipeline};

// Error handling
pub use error::{Result, TonemixError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
