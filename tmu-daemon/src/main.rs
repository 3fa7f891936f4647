//! TMU Daemon (tmud)
//!
//! Owns every configured thermal management unit: programs the trip
//! thresholds, services threshold interrupts delivered through UIO, polls
//! passive zones and feeds the cooling actuators. Local clients reach it
//! through a Unix domain socket.
//!
//! # Runtime layout
//! - **UIO listeners**: one thread per interrupt-driven device
//! - **Interrupt workers**: one per device, owned by the engine
//! - **Poll loop**: tokio interval over every registered device
//! - **Server**: tokio `UnixListener`, one task per client

mod actuators;
mod irq_source;
mod monitor;
mod server;

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{error, info, warn};

use tmu_core::constants::paths;
use tmu_core::{find_config_path, load_config};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Cleanup
// ============================================================================

fn cleanup(socket_path: &str) {
    if Path::new(socket_path).exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!("Failed to remove socket: {}", e);
        }
    }
    info!("Cleanup complete");
}

// ============================================================================
// CLI
// ============================================================================

fn print_help() {
    eprintln!("tmud {} - Exynos TMU thermal daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    tmud [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Configuration file (default {})", paths::system_config_path().display());
    eprintln!("    -s, --socket PATH   Socket path (default {})", paths::SOCKET_PATH);
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    TMU_LOG             Log filter (trace, debug, info, warn, error)");
}

fn print_version() {
    println!("tmud {}", VERSION);
}

fn init_logging(log_level: &str) -> bool {
    let use_journald = Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    let args: Vec<String> = std::env::args().collect();
    let mut socket_path = paths::SOCKET_PATH.to_string();
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return;
            }
            "-v" | "--version" => {
                print_version();
                return;
            }
            "-s" | "--socket" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --socket requires a path argument");
                    std::process::exit(1);
                }
                socket_path = args[i].clone();
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let log_level = std::env::var("TMU_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);

    info!("STARTUP: tmud {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    let config_path = match config_path.or_else(find_config_path) {
        Some(path) => path,
        None => {
            error!("No configuration file found (tried {})", paths::system_config_path().display());
            std::process::exit(1);
        }
    };
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };
    info!("STARTUP: Configuration: {}", config_path.display());

    let monitor = match monitor::Monitor::start(&config) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Device bring-up failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        let _ = shutdown_tx.send(true);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    info!("STARTUP: Socket path: {}", socket_path);
    info!("STARTUP: PID: {}", std::process::id());

    let poll_handle = tokio::spawn(monitor::run_poll_loop(
        monitor.registry(),
        monitor.poll_interval(),
        shutdown_rx.clone(),
    ));

    let result = server::run_server(&socket_path, monitor.registry(), shutdown_rx).await;

    // The server also returns on bind failure, so the poll loop may still run
    poll_handle.abort();
    let _ = poll_handle.await;

    let _ = tokio::task::spawn_blocking(move || monitor.shutdown()).await;
    cleanup(&socket_path);

    if let Err(e) = result {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }
    info!("SHUTDOWN: Daemon terminated gracefully");
}
