//! `levelq-bot`: runs the level queue service.
//!
//! Loads settings, hydrates stored state (upgrading old formats), then runs
//! the wait ticker until interrupted. Pending writes are flushed on exit.
//!
//! # Environment variables
//!
//! | Variable        | Required | Default         | Description                         |
//! |-----------------|----------|-----------------|-------------------------------------|
//! | `SETTINGS_PATH` | no       | `settings.json` | JSON settings file                  |
//! | `ROSTER_PATH`   | no       | --              | JSON roster file read on each fetch |
//! | `RUST_LOG`      | no       | `info` per crate| Log filter                          |

mod roster;

use std::path::PathBuf;
use std::sync::Arc;

use levelq_core::Settings;
use levelq_persistence::LoginResolver;
use levelq_service::{PresenceProvider, StaticPresence, WaitTicker};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::roster::RosterFile;

const DEFAULT_SETTINGS_PATH: &str = "settings.json";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "levelq_bot=info,levelq_service=info,levelq_persistence=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let settings_path = std::env::var("SETTINGS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH));

    let settings = if settings_path.is_file() {
        Settings::load(&settings_path)?
    } else {
        tracing::warn!(
            path = %settings_path.display(),
            "Settings file not found, using defaults"
        );
        Settings::default()
    };

    let provider: Arc<dyn PresenceProvider> = match std::env::var("ROSTER_PATH") {
        Ok(path) => {
            tracing::info!(path = %path, "Reading roster from file");
            Arc::new(RosterFile::new(path))
        }
        Err(_) => {
            tracing::warn!("ROSTER_PATH not set, presence will be unavailable");
            Arc::new(StaticPresence::unavailable())
        }
    };

    let runtime = levelq_service::start(&settings, provider, Arc::new(LoginResolver))?;

    let cancel = CancellationToken::new();
    let ticker = WaitTicker::new(runtime.service.clone(), settings.wait_tick());
    let ticker_cancel = cancel.clone();
    let ticker_handle = tokio::spawn(async move {
        ticker.run(ticker_cancel).await;
    });

    tracing::info!(
        data_directory = %settings.data_directory.display(),
        selection = ?settings.level_selection,
        "Level queue running"
    );

    shutdown_signal().await;

    cancel.cancel();
    ticker_handle.await?;

    drop(runtime.service);
    if let Some(writer) = runtime.writer {
        writer.await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
