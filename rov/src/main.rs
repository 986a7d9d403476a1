//! # ROV Control Plane Binary
//!
//! Runs the task manager, mode watcher, packet sink, command intake and
//! video transport until Ctrl+C, a `shutdown` line on stdin, or a fatal
//! worker error.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (simulated cameras, intake on 127.0.0.1:8765)
//! rov
//!
//! # Custom config, verbose JSON logs
//! rov --config /etc/rov/rov.toml -v --json
//! ```
//!
//! Lines typed on stdin are queued as commands: either a bare name such as
//! `START_DOCKING` or a JSON message `{"command":"START_DOCKING"}`.

use clap::Parser;
use rov::autonomy::PlaceholderAutonomy;
use rov::RovSystem;
use rov_common::config::{ConfigLoader, RovConfig};
use rov_common::consts::DEFAULT_CONFIG_PATH;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// ROV control plane - mode-driven task orchestration and video relay
#[derive(Parser, Debug)]
#[command(name = "rov")]
#[command(version)]
#[command(about = "ROV control plane: task orchestration, video relay, drive packets")]
#[command(long_about = None)]
struct Args {
    /// Path to configuration file (rov.toml). Defaults are used if missing.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

/// Why the main loop ended.
enum Trigger {
    Interrupt,
    Stdin,
    Fatal,
}

/// Depth of the stdin line queue.
const STDIN_QUEUE_DEPTH: usize = 16;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            // No subscriber is installed yet.
            eprintln!("ROV startup failed: {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };
    setup_tracing(&args, &config);

    match run(&args, config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("ROV startup failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when a fatal worker error caused the shutdown.
async fn run(args: &Args, config: RovConfig) -> Result<bool, Box<dyn std::error::Error>> {
    info!("ROV control plane v{} starting...", env!("CARGO_PKG_VERSION"));

    let system = RovSystem::from_config(config, Arc::new(PlaceholderAutonomy)).await?;
    let stdin = spawn_stdin_reader();

    let trigger = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Unable to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal (Ctrl+C)");
            Trigger::Interrupt
        }
        _ = read_stdin(&system, stdin) => Trigger::Stdin,
        _ = system.wait_fatal() => Trigger::Fatal,
    };

    match trigger {
        Trigger::Interrupt => {}
        Trigger::Stdin => info!("Shutdown requested on stdin"),
        Trigger::Fatal => warn!("Fatal worker error, shutting down"),
    }

    let report = system.shutdown().await;
    let summary = system.summary();

    if args.json {
        match serde_json::to_string(&summary) {
            Ok(json) => info!(summary = %json, "Final system state"),
            Err(e) => warn!("Failed to encode summary: {}", e),
        }
    }

    info!("Final system state:");
    info!("  - Mode: {} (manual={})", summary.mode, summary.manual);
    info!("  - Live workers: {}", summary.live_workers);
    info!("  - Viewer sessions: {}", summary.viewer_sessions);
    info!("  - Cameras open: {}", summary.cameras_open);
    info!("  - Resources released: {:?}", report.released);
    for ch in &summary.channels {
        info!(
            "  - {}: pushed={} evicted={}",
            ch.channel, ch.pushed, ch.evicted
        );
    }
    if !report.panicked.is_empty() {
        warn!("Workers that panicked: {:?}", report.panicked);
    }

    match report.fatal.or_else(|| system.registry().fatal_reason()) {
        Some(reason) => {
            error!("ROV stopped after fatal error: {}", reason);
            Ok(false)
        }
        None => {
            info!("ROV control plane shutdown complete");
            Ok(true)
        }
    }
}

fn load_config(path: &Path) -> Result<RovConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        let config = RovConfig::load(path)?;
        config.validate()?;
        Ok(config)
    } else {
        // Tracing is not set up yet.
        eprintln!("config {} not found, using defaults", path.display());
        Ok(RovConfig::default())
    }
}

/// Read stdin on a plain thread.
///
/// A blocked read must not hold up runtime teardown, so it stays off the
/// tokio blocking pool. The thread ends with the process.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(STDIN_QUEUE_DEPTH);
    let spawned = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("stdin reader unavailable: {}", e);
    }
    rx
}

/// Queue stdin lines as commands until `shutdown` or EOF.
async fn read_stdin(system: &RovSystem, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("shutdown") {
            return;
        }
        let queued = if line.starts_with('{') {
            system.submit(line)
        } else {
            system.command(line)
        };
        if let Err(e) = queued {
            warn!("stdin command dropped: {}", e);
        }
    }
    // Without a terminal, keep running until a signal arrives.
    std::future::pending::<()>().await
}

/// Setup tracing subscriber from CLI arguments and config.
fn setup_tracing(args: &Args, config: &RovConfig) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.shared.log_level.as_directive()))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    }
}
