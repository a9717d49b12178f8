//! Wiring a service from settings.

use std::sync::Arc;

use chrono::Utc;
use levelq_core::Settings;
use levelq_persistence::{
    hydrate, DataDir, DocumentWriter, IdentityResolver, LoadContext, Persister,
};
use tokio::task::JoinHandle;

use crate::error::ServiceError;
use crate::presence::{OnlinePresence, PresenceProvider};
use crate::service::{QueueService, ServiceConfig};

/// A hydrated service plus the writer task that persists it.
pub struct Runtime {
    pub service: Arc<QueueService>,
    /// Finishes once the service (and every writer handle) is dropped and
    /// the backlog is on disk. `None` when persistence is disabled.
    pub writer: Option<JoinHandle<()>>,
}

/// Load stored state and build the service. Any load failure is returned
/// before anything is written or spawned.
pub fn start(
    settings: &Settings,
    provider: Arc<dyn PresenceProvider>,
    resolver: Arc<dyn IdentityResolver>,
) -> Result<Runtime, ServiceError> {
    let dir = DataDir::new(&settings.data_directory);
    let ctx = LoadContext::new(dir.root(), Utc::now(), resolver);
    let hydrated = hydrate(&dir, &ctx, settings.persistence_enabled)?;

    tracing::info!(
        levels = hydrated.queue.state.len(),
        current = hydrated.queue.state.current().is_some(),
        waiting = hydrated.queue.ledger.len(),
        aliases = hydrated.custom_codes.len(),
        "Queue hydrated"
    );

    let (persister, writer) = if settings.persistence_enabled {
        let (writer, handle) = DocumentWriter::spawn();
        (Persister::new(dir, writer), Some(handle))
    } else {
        tracing::warn!("Persistence disabled, changes will not be saved");
        (Persister::disabled(dir), None)
    };

    let presence = OnlinePresence::new(provider, settings.presence_timeout());
    let service = QueueService::new(
        ServiceConfig::from_settings(settings),
        hydrated,
        presence,
        persister,
    );

    Ok(Runtime {
        service: Arc::new(service),
        writer,
    })
}
