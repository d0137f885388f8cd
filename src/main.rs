//! dialbridge - drive ElMo, PyMOL or Coot parameters from MIDI, OSC and gamepads

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod monitor;

use dialbridge::adapter::{console::ConsoleAdapter, AdapterRegistry};
use dialbridge::config::{default_profile, ProfileConfig, ProfileWatcher};
use dialbridge::engine::{Engine, EngineHandle};
use dialbridge::sources::{gamepad, midi, OscSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// dialbridge - map control surfaces to visualization parameters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the mapping profile (built-in ElMo profile when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Console log format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Also write a daily rolling log file
    #[arg(long)]
    log_file: bool,

    /// Directory for log files
    #[arg(long, env = "DIALBRIDGE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,

    /// Print decoded events from a MIDI input port
    #[arg(long, value_name = "PORT")]
    monitor: Option<String>,

    /// Write the built-in profile as YAML and exit
    #[arg(long, value_name = "PATH")]
    write_default_profile: Option<String>,

    /// Print telemetry as JSON lines
    #[arg(long)]
    telemetry_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard = init_logging(&args)?;

    if args.list_ports {
        monitor::list_ports_formatted();
        return Ok(());
    }

    if let Some(path) = &args.write_default_profile {
        default_profile().save(path).await?;
        println!("Default profile written to {}", path);
        return Ok(());
    }

    if let Some(pattern) = &args.monitor {
        return monitor::run_monitor(pattern).await;
    }

    info!("Starting dialbridge v{}...", env!("CARGO_PKG_VERSION"));

    let (profile, watcher) = match &args.config {
        Some(path) => {
            info!("Profile: {}", path);
            let (watcher, profile) = ProfileWatcher::new(path.clone()).await?;
            (profile, Some(watcher))
        }
        None => {
            info!("No profile given, using the built-in ElMo profile");
            (default_profile(), None)
        }
    };

    let table = profile.to_table()?;

    let adapters = AdapterRegistry::new();
    for backend in profile.backend_ids() {
        adapters
            .register(Arc::new(ConsoleAdapter::new(backend.as_str())))
            .await
            .with_context(|| format!("Failed to start adapter '{}'", backend))?;
    }

    let (engine, mut telemetry) = Engine::start(profile.engine.clone(), table, adapters);

    open_sources(&engine, &profile).await;

    if let Some(watcher) = watcher {
        tokio::spawn(watcher.apply_to(engine.clone()));
        info!("Hot reload enabled");
    }

    let json = args.telemetry_json;
    let printer = tokio::spawn(async move {
        while let Some(event) = telemetry.recv().await {
            monitor::print_telemetry(&event, json);
        }
    });

    shutdown_signal().await;

    engine.shutdown().await;
    let stats = engine.stats();
    info!(
        "Events: {} received, {} dropped, {} malformed, {} unbound; sends: {} ok, {} failed",
        stats.received, stats.dropped, stats.malformed, stats.unbound, stats.sent, stats.failed
    );
    printer.abort();

    info!("dialbridge shutdown complete");
    Ok(())
}

/// Open every source of the profile; failures are logged and skipped
async fn open_sources(engine: &EngineHandle, profile: &ProfileConfig) {
    for source in &profile.sources.midi {
        match midi::open_input(&source.id, &source.port) {
            Ok(input) => register(engine, input, &source.id),
            Err(e) => warn!("MIDI source '{}' unavailable: {:#}", source.id, e),
        }
    }

    for source in &profile.sources.osc {
        match OscSource::bind(&source.id, &source.bind).await {
            Ok(input) => register(engine, input, &source.id),
            Err(e) => warn!("OSC source '{}' unavailable: {:#}", source.id, e),
        }
    }

    if let Some(pad) = profile.sources.gamepad.as_ref().filter(|g| g.enabled) {
        register(engine, gamepad::open(&pad.id, pad.deadzone), &pad.id);
    }
}

fn register<S: dialbridge::engine::EventSource + 'static>(engine: &EngineHandle, source: S, id: &str) {
    match engine.add_source(source) {
        Ok(()) => info!("Source '{}' started", id),
        Err(e) => error!("Source '{}' not started: {}", id, e),
    }
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    let console = match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let (file, guard) = if args.log_file {
        let dir = match &args.log_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .context("No local data directory for log files")?
                .join("dialbridge")
                .join("logs"),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let appender = tracing_appender::rolling::daily(&dir, "dialbridge.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
