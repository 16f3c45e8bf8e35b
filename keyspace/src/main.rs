//! `keyspaced` - owns a key registry and sweeps expired keys on a timer.

use anyhow::Context;
use keyspace::infrastructure::audit::{self, AuditEvent};
use keyspace::infrastructure::config::Settings;
use keyspace::infrastructure::telemetry::TelemetryBuilder;
use keyspace::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Settings::new().context("Failed to load configuration")?;

    TelemetryBuilder::from_settings(&config.telemetry)
        .init()
        .context("Failed to initialize telemetry")?;

    info!("Keyspace daemon starting...");
    audit::log_audit(&AuditEvent::SystemStartup {
        component: "keyspaced".into(),
    });

    let registry = Arc::new(
        Registry::from_settings(&config.keyspace).context("Failed to initialize key registry")?,
    );

    let sweeper = tokio::spawn(sweep_loop(
        registry.clone(),
        config.keyspace.sweep_interval(),
    ));

    info!(
        "Keyspace daemon initialized (root {:?}). Waiting for shutdown signal...",
        registry.root()
    );

    shutdown_signal().await;

    info!("Shutdown signal received, cleaning up...");
    sweeper.abort();
    audit::log_audit(&AuditEvent::SystemShutdown {
        reason: "Signal received".into(),
    });

    info!("Keyspace daemon shutdown complete.");
    Ok(())
}

/// Purges expired keys and orphaned directories every `period`.
async fn sweep_loop(registry: Arc<Registry>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let registry = registry.clone();
        let sweep = tokio::task::spawn_blocking(move || {
            let report = registry.purge_expired();
            let orphans = registry.purge_orphaned();
            (report, orphans)
        })
        .await;

        match sweep {
            Ok((report, orphans)) => {
                for failure in &report.failures {
                    warn!("Sweep left a directory behind: {}", failure);
                }
                if let Err(e) = orphans {
                    warn!("Orphan sweep failed: {}", e);
                }
            }
            Err(e) => error!("Sweep task failed: {:?}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
