use anyhow::{Context, Result};
use clap::Parser;
use tonemix::app::{build_device, run_device};
use tonemix::bus::{BusEvent, EventPoster};
use tonemix::cli::{Cli, Commands, ConfigAction, RunArgs};
use tonemix::config::Config;
use tonemix::link::LinkScript;
use tonemix::orchestrator::Transition;
use tonemix::tone::ToneTable;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_command(config, RunArgs::default()).await?;
        }
        Some(Commands::Run(args)) => {
            let config = load_config(cli.config.as_deref())?;
            run_command(config, args).await?;
        }
        Some(Commands::Tones) => {
            let config = load_config(cli.config.as_deref())?;
            for (kind, locator) in ToneTable::from_config(&config.tones).entries() {
                println!("{:<18} {}", kind, locator);
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
    }

    Ok(())
}

/// `-q` → warn, default → info, `-v` → debug, `-vv` → trace. `RUST_LOG` wins.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/tonemix/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Runs the device until its event loop ends or a signal arrives.
///
/// The orchestrator blocks, so it lives on a blocking thread; signals are
/// turned into a shutdown sentinel on its bus.
async fn run_command(config: Config, args: RunArgs) -> Result<()> {
    let script = LinkScript {
        connect_after: args.connect_after,
        stream: args.stream,
        disconnect_after: args.disconnect_after,
    };

    info!(version = %tonemix::version_string(), "tonemix starting");
    let mut device = build_device(&config, script).context("failed to wire device")?;
    let poster = device.poster();

    let printer = if args.json {
        let (tx, rx) = crossbeam_channel::unbounded::<Transition>();
        device = device.with_transition_sender(tx);
        Some(std::thread::spawn(move || {
            for transition in rx {
                match serde_json::to_string(&transition) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "transition not printable"),
                }
            }
        }))
    } else {
        None
    };

    let mut task = tokio::task::spawn_blocking(move || run_device(device));

    let report = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            request_shutdown(&poster);
            task.await
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                warn!(error = %e, "SIGTERM handler unavailable");
            }
            info!("received SIGTERM, shutting down");
            request_shutdown(&poster);
            task.await
        }
    }
    .context("device thread failed")??;

    if let Some(printer) = printer
        && printer.join().is_err()
    {
        warn!("transition printer panicked");
    }

    info!(
        exit = ?report.exit,
        frames = report.frames_played,
        "tonemix stopped"
    );
    Ok(())
}

fn request_shutdown(poster: &EventPoster) {
    if !poster.post(BusEvent::Shutdown) {
        warn!("event bus already closed");
    }
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // Ctrl+C still works
    std::future::pending::<()>().await;
    Ok(())
}

fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&std::path::Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(|p| p.to_path_buf())
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
