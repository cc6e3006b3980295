pub mod config;
pub mod logging;
pub mod pipeline;
pub mod units;

pub use config::{Config, ConfigError, Destination, LogLevel};
pub use pipeline::{FlushOutcome, Forwarder, ReadProgress};

use crate::sender::StepOutcome;
use crate::stats::StatsRegistry;
use anyhow::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tracing::{info, warn};

// Driver pacing: back off when an iteration moved no data.
const BUSY_SLEEP: Duration = Duration::from_millis(1);
const IDLE_SLEEP: Duration = Duration::from_millis(10);

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args_os())?;
    let config = match &config.config_file {
        Some(path) => {
            Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => config,
    };

    logging::init(config.log_level);
    run(config).await
}

/// The polling loop: read, write, sleep, repeat, until end of input or a
/// shutdown signal, then drain.
pub async fn run(config: Config) -> anyhow::Result<()> {
    info!("starting logship v{}", crate::VERSION);

    let source: Box<dyn AsyncRead + Send + Unpin> = match &config.input_file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input file {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut forwarder = Forwarder::new(&config, source)?;
    let stats = forwarder.stats();

    spawn_status_listener(stats.clone());
    let shutdown = spawn_shutdown_listener();

    let mut last_status = Instant::now();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested, draining");
            break;
        }

        let read = forwarder.poll_read().await;
        let wrote = forwarder.poll_write().await;

        if !config.status_interval.is_zero() && last_status.elapsed() >= config.status_interval {
            last_status = Instant::now();
            info!("{}", stats.snapshot());
        }

        match read {
            ReadProgress::Eof => break,
            ReadProgress::Data(_) => tokio::time::sleep(BUSY_SLEEP).await,
            ReadProgress::Idle => {
                let sleep = if wrote == StepOutcome::Progress {
                    BUSY_SLEEP
                } else {
                    IDLE_SLEEP
                };
                tokio::time::sleep(sleep).await;
            }
        }
    }

    match forwarder.flush().await {
        FlushOutcome::Drained => info!("pipeline drained"),
        FlushOutcome::GaveUp => warn!("gave up draining, buffered data was lost"),
        FlushOutcome::NoTransport => {
            warn!("no collector configured, buffered data stays local")
        }
    }
    info!("{}", stats.snapshot());
    Ok(())
}

/// SIGUSR1 dumps a stats snapshot on demand, mirroring the usual
/// kill-to-inspect workflow for long-running agents.
#[cfg(unix)]
fn spawn_status_listener(stats: Arc<StatsRegistry>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let Ok(mut usr1) = signal(SignalKind::user_defined1()) else {
            warn!("failed to install SIGUSR1 handler");
            return;
        };
        while usr1.recv().await.is_some() {
            let snapshot = stats.snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => info!("{json}"),
                Err(_) => info!("{snapshot}"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_status_listener(_stats: Arc<StatsRegistry>) {}

fn spawn_shutdown_listener() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::Relaxed);
        }
    });
    shutdown
}
