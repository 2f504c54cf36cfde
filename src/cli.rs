//! Command-line interface for tonemix
//!
//! Provides argument parsing using clap derive macros.

use crate::bus::AudioInfo;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Announcement mixer for a wireless speaker
#[derive(Parser, Debug)]
#[command(
    name = "tonemix",
    version,
    about = "Announcement mixer for a wireless speaker"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the device with a simulated wireless link (default)
    Run(RunArgs),

    /// Print the announcement tone table
    Tones,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options for `tonemix run`
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// When the simulated remote connects. Examples: 500ms, 2s
    #[arg(long, value_name = "DURATION", default_value = "2s", value_parser = parse_duration)]
    pub connect_after: Duration,

    /// Format the remote streams, as RATE/BITS/CHANNELS
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "44100/16/2",
        value_parser = parse_stream_format
    )]
    pub stream: AudioInfo,

    /// Drop the link this long after connecting (default: never)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub disconnect_after: Option<Duration>,

    /// Print every state transition as a JSON line on stdout
    #[arg(long)]
    pub json: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            connect_after: Duration::from_secs(2),
            stream: AudioInfo::new(44100, 16, 2),
            disconnect_after: None,
            json: false,
        }
    }
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}

/// Parse a duration string.
///
/// Supports any format accepted by `humantime` (`500ms`, `2s`, `1m30s`);
/// a bare number is taken as milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse `RATE/BITS/CHANNELS`, e.g. `48000/16/2`.
fn parse_stream_format(s: &str) -> Result<AudioInfo, String> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    let [rate, bits, channels] = parts.as_slice() else {
        return Err(format!("expected RATE/BITS/CHANNELS, got '{}'", s));
    };
    let rate: u32 = rate
        .parse()
        .map_err(|_| format!("invalid sample rate '{}'", rate))?;
    let bits: u16 = bits
        .parse()
        .map_err(|_| format!("invalid bit depth '{}'", bits))?;
    let channels: u16 = channels
        .parse()
        .map_err(|_| format!("invalid channel count '{}'", channels))?;
    if rate == 0 || channels == 0 {
        return Err("sample rate and channel count must be positive".to_string());
    }
    Ok(AudioInfo::new(rate, bits, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["tonemix"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["tonemix", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["tonemix", "run"]).unwrap();
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args, RunArgs::default()),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_parse_run_with_script() {
        let cli = Cli::try_parse_from([
            "tonemix",
            "run",
            "--connect-after",
            "500ms",
            "--stream",
            "48000/16/2",
            "--disconnect-after",
            "1m30s",
            "--json",
        ])
        .unwrap();

        let Some(Commands::Run(args)) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.connect_after, Duration::from_millis(500));
        assert_eq!(args.stream, AudioInfo::new(48000, 16, 2));
        assert_eq!(args.disconnect_after, Some(Duration::from_secs(90)));
        assert!(args.json);
    }

    #[test]
    fn test_bare_number_is_milliseconds() {
        assert_eq!(parse_duration("250"), Ok(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_stream_format_needs_three_parts() {
        assert!(parse_stream_format("48000/16").is_err());
        assert!(parse_stream_format("48000/16/0").is_err());
        assert!(parse_stream_format("abc/16/2").is_err());
    }

    #[test]
    fn test_parse_config_path() {
        let cli = Cli::try_parse_from(["tonemix", "config", "path"]).unwrap();
        match cli.command {
            Some(Commands::Config {
                action: ConfigAction::Path,
            }) => {}
            _ => panic!("Expected Config Path command"),
        }
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = Cli::try_parse_from(["tonemix", "tones", "--config", "/tmp/config.toml", "-q"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert!(cli.quiet);
    }

    #[test]
    fn test_invalid_command_returns_error() {
        let result = Cli::try_parse_from(["tonemix", "invalid"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_version_flag() {
        let result = Cli::try_parse_from(["tonemix", "--version"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
