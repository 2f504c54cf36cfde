//! Error types for tonemix.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TonemixError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pipeline wiring errors
    #[error("Pipeline '{pipeline}' has no element named '{element}'")]
    UnknownElement { pipeline: String, element: String },

    #[error("Pipeline '{pipeline}' already has an element named '{element}'")]
    DuplicateElement { pipeline: String, element: String },

    #[error("Failed to link pipeline '{pipeline}': {message}")]
    LinkFailed { pipeline: String, message: String },

    // Pipeline lifecycle errors
    #[error("Pipeline '{pipeline}' cannot {operation} while {phase}")]
    InvalidPhase {
        pipeline: String,
        operation: &'static str,
        phase: String,
    },

    // Element errors
    #[error("Element '{element}' does not accept {config}")]
    UnsupportedConfig { element: String, config: String },

    #[error("Element '{element}' failed: {message}")]
    Element { element: String, message: String },

    #[error("Cannot open asset {uri}: {message}")]
    Asset { uri: String, message: String },

    // Downmix control errors
    #[error("Downmix slot {slot} is already bound")]
    SlotAlreadyBound { slot: String },

    #[error("Lock poisoned: {what}")]
    LockPoisoned { what: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TonemixError {
    pub(crate) fn poisoned(what: &str) -> Self {
        TonemixError::LockPoisoned {
            what: what.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TonemixError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = TonemixError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = TonemixError::ConfigInvalidValue {
            key: "output.sample_rate".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for output.sample_rate: must be positive"
        );
    }

    #[test]
    fn test_unknown_element_display() {
        let error = TonemixError::UnknownElement {
            pipeline: "announcement".to_string(),
            element: "tone_file".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Pipeline 'announcement' has no element named 'tone_file'"
        );
    }

    #[test]
    fn test_invalid_phase_display() {
        let error = TonemixError::InvalidPhase {
            pipeline: "announcement".to_string(),
            operation: "run",
            phase: "running".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Pipeline 'announcement' cannot run while running"
        );
    }

    #[test]
    fn test_slot_already_bound_display() {
        let error = TonemixError::SlotAlreadyBound {
            slot: "base".to_string(),
        };
        assert_eq!(error.to_string(), "Downmix slot base is already bound");
    }

    #[test]
    fn test_unsupported_config_display() {
        let error = TonemixError::UnsupportedConfig {
            element: "base_raw".to_string(),
            config: "a source URI".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Element 'base_raw' does not accept a source URI"
        );
    }

    #[test]
    fn test_other_display() {
        let error = TonemixError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: TonemixError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: TonemixError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<TonemixError>();
        assert_sync::<TonemixError>();
    }
}
