use crate::bus::AudioInfo;
use crate::defaults;
use crate::error::{Result, TonemixError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub output: OutputConfig,
    pub downmix: DownmixConfig,
    pub tones: TonesConfig,
    pub shutdown: ShutdownConfig,
}

/// Wireless link configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub device_name: String,
}

/// Output device format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
    pub frame_ms: u32,
}

/// Downmix engine knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownmixConfig {
    pub transition_ms: u32,
    pub duck_db: f32,
    pub announcement_timeout_ms: u64,
    pub ring_buffer_frames: usize,
}

/// Announcement tone locators
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TonesConfig {
    pub connected: String,
    pub disconnected: String,
    pub ready_to_connect: String,
    pub clip_ms: u32,
}

/// Shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Bounded wait for stop acknowledgment. `None` or 0 waits forever.
    pub stop_timeout_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: defaults::DEVICE_NAME.to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            bits: defaults::BITS,
            frame_ms: defaults::FRAME_MS,
        }
    }
}

impl Default for DownmixConfig {
    fn default() -> Self {
        Self {
            transition_ms: defaults::TRANSITION_MS,
            duck_db: defaults::DUCK_DB,
            announcement_timeout_ms: defaults::ANNOUNCEMENT_TIMEOUT_MS,
            ring_buffer_frames: defaults::RING_BUFFER_FRAMES,
        }
    }
}

impl Default for TonesConfig {
    fn default() -> Self {
        Self {
            connected: defaults::TONE_CONNECTED.to_string(),
            disconnected: defaults::TONE_DISCONNECTED.to_string(),
            ready_to_connect: defaults::TONE_READY_TO_CONNECT.to_string(),
            clip_ms: defaults::CLIP_MS,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: Some(defaults::STOP_TIMEOUT_MS),
        }
    }
}

impl ShutdownConfig {
    pub fn stop_timeout(&self) -> Option<Duration> {
        match self.stop_timeout_ms {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

impl OutputConfig {
    pub fn info(&self) -> AudioInfo {
        AudioInfo::new(self.sample_rate, self.bits, self.channels)
    }
}

impl DownmixConfig {
    pub fn announcement_timeout(&self) -> Duration {
        Duration::from_millis(self.announcement_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TonemixError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                TonemixError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(TonemixError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TONEMIX_DEVICE_NAME → link.device_name
    /// - TONEMIX_STOP_TIMEOUT_MS → shutdown.stop_timeout_ms
    /// - TONEMIX_ANNOUNCEMENT_TIMEOUT_MS → downmix.announcement_timeout_ms
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = std::env::var("TONEMIX_DEVICE_NAME")
            && !name.is_empty()
        {
            self.link.device_name = name;
        }

        if let Ok(value) = std::env::var("TONEMIX_STOP_TIMEOUT_MS")
            && let Ok(ms) = value.trim().parse::<u64>()
        {
            self.shutdown.stop_timeout_ms = Some(ms);
        }

        if let Ok(value) = std::env::var("TONEMIX_ANNOUNCEMENT_TIMEOUT_MS")
            && let Ok(ms) = value.trim().parse::<u64>()
        {
            self.downmix.announcement_timeout_ms = ms;
        }

        self
    }

    /// Reject values the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.output.sample_rate == 0 {
            return Err(invalid("output.sample_rate", "must be positive"));
        }
        if self.output.channels == 0 {
            return Err(invalid("output.channels", "must be positive"));
        }
        if self.output.bits != defaults::BITS {
            return Err(invalid("output.bits", "only 16-bit PCM is supported"));
        }
        if self.output.frame_ms == 0 {
            return Err(invalid("output.frame_ms", "must be positive"));
        }
        if self.downmix.duck_db > 0.0 {
            return Err(invalid(
                "downmix.duck_db",
                "must be an attenuation (<= 0 dB)",
            ));
        }
        if self.downmix.ring_buffer_frames == 0 {
            return Err(invalid("downmix.ring_buffer_frames", "must be positive"));
        }
        for (key, locator) in [
            ("tones.connected", &self.tones.connected),
            ("tones.disconnected", &self.tones.disconnected),
            ("tones.ready_to_connect", &self.tones.ready_to_connect),
        ] {
            if locator.trim().is_empty() {
                return Err(invalid(key, "locator must not be empty"));
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/tonemix/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tonemix")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> TonemixError {
    TonemixError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_tonemix_env() {
        remove_env("TONEMIX_DEVICE_NAME");
        remove_env("TONEMIX_STOP_TIMEOUT_MS");
        remove_env("TONEMIX_ANNOUNCEMENT_TIMEOUT_MS");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.link.device_name, "Ochil Room");
        assert_eq!(config.output.sample_rate, 48000);
        assert_eq!(config.output.channels, 1);
        assert_eq!(config.output.bits, 16);
        assert_eq!(config.downmix.transition_ms, 500);
        assert_eq!(config.downmix.duck_db, -10.0);
        assert_eq!(config.downmix.announcement_timeout_ms, 50);
        assert_eq!(config.tones.connected, "flash://tone/0_connected.mp3");
        assert_eq!(
            config.shutdown.stop_timeout(),
            Some(Duration::from_millis(2000))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [link]
            device_name = "Kitchen"

            [output]
            sample_rate = 44100
            channels = 2

            [downmix]
            duck_db = -6.0
            announcement_timeout_ms = 80

            [tones]
            connected = "file:///srv/tones/hello.raw"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.link.device_name, "Kitchen");
        assert_eq!(config.output.sample_rate, 44100);
        assert_eq!(config.output.channels, 2);
        assert_eq!(config.output.bits, 16);
        assert_eq!(config.downmix.duck_db, -6.0);
        assert_eq!(
            config.downmix.announcement_timeout(),
            Duration::from_millis(80)
        );
        assert_eq!(config.tones.connected, "file:///srv/tones/hello.raw");
        assert_eq!(config.tones.disconnected, "flash://tone/1_disconnected.mp3");
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let result = Config::load(Path::new("/nonexistent/tonemix/config.toml"));
        assert!(matches!(
            result,
            Err(TonemixError::ConfigFileNotFound { .. })
        ));
    }

    #[test]
    fn test_load_or_default_missing_file_returns_defaults() {
        let config = Config::load_or_default(Path::new("/nonexistent/tonemix/config.toml"))
            .expect("missing file should fall back to defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_invalid_toml_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[output\nsample_rate = ").unwrap();

        let result = Config::load_or_default(temp_file.path());
        assert!(matches!(result, Err(TonemixError::Config(_))));
    }

    #[test]
    fn test_zero_stop_timeout_means_unbounded() {
        let shutdown = ShutdownConfig {
            stop_timeout_ms: Some(0),
        };
        assert_eq!(shutdown.stop_timeout(), None);

        let shutdown = ShutdownConfig {
            stop_timeout_ms: None,
        };
        assert_eq!(shutdown.stop_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_positive_duck_level() {
        let mut config = Config::default();
        config.downmix.duck_db = 3.0;

        match config.validate() {
            Err(TonemixError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "downmix.duck_db")
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_sample_rate() {
        let mut config = Config::default();
        config.output.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_bit_depth() {
        for bits in [0, 8, 24] {
            let mut config = Config::default();
            config.output.bits = bits;

            match config.validate() {
                Err(TonemixError::ConfigInvalidValue { key, .. }) => {
                    assert_eq!(key, "output.bits")
                }
                other => panic!("Expected ConfigInvalidValue for {} bits, got {:?}", bits, other),
            }
        }
    }

    #[test]
    fn test_output_info_carries_configured_format() {
        let output = OutputConfig {
            sample_rate: 44100,
            channels: 2,
            bits: 16,
            frame_ms: 10,
        };
        assert_eq!(output.info(), AudioInfo::new(44100, 16, 2));
    }

    #[test]
    fn test_validate_rejects_empty_locator() {
        let mut config = Config::default();
        config.tones.ready_to_connect = "  ".to_string();

        match config.validate() {
            Err(TonemixError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "tones.ready_to_connect")
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides_apply() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_tonemix_env();

        set_env("TONEMIX_DEVICE_NAME", "Garage");
        set_env("TONEMIX_STOP_TIMEOUT_MS", "750");
        set_env("TONEMIX_ANNOUNCEMENT_TIMEOUT_MS", "20");

        let config = Config::default().with_env_overrides();
        clear_tonemix_env();

        assert_eq!(config.link.device_name, "Garage");
        assert_eq!(config.shutdown.stop_timeout_ms, Some(750));
        assert_eq!(config.downmix.announcement_timeout_ms, 20);
    }

    #[test]
    fn test_env_overrides_ignore_empty_and_garbage() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_tonemix_env();

        set_env("TONEMIX_DEVICE_NAME", "");
        set_env("TONEMIX_STOP_TIMEOUT_MS", "soon");

        let config = Config::default().with_env_overrides();
        clear_tonemix_env();

        assert_eq!(config.link.device_name, "Ochil Room");
        assert_eq!(config.shutdown.stop_timeout_ms, Some(2000));
    }

    #[test]
    fn test_default_path_ends_with_tonemix_config() {
        let path = Config::default_path();
        assert!(path.ends_with("tonemix/config.toml"));
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("should serialize");
        let parsed: Config = toml::from_str(&text).expect("should parse");
        assert_eq!(config, parsed);
    }
}
