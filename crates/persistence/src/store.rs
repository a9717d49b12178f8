//! Startup hydration and runtime saves for every stored document.

use std::any::Any;
use std::path::Path;

use levelq_core::custom_codes::CustomCodes;
use levelq_core::queue::QueueState;
use levelq_core::wait::WaitLedger;

use crate::atomic::write_json_atomic;
use crate::chain::{Loaded, VersionChain};
use crate::context::LoadContext;
use crate::custom_codes_doc::{custom_codes_chain, CustomCodesDocument};
use crate::error::PersistenceError;
use crate::layout::DataDir;
use crate::queue_doc::{queue_chain, QueueDocument, QueueSnapshot};
use crate::writer::DocumentWriter;

/// Everything loaded at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hydrated {
    pub queue: QueueSnapshot,
    pub custom_codes: CustomCodes,
}

/// Load every document, upgrading older versions. Upgrades are committed
/// (hooks run, newest form written) only when `persistence_enabled`.
/// Missing documents start empty.
pub fn hydrate(
    dir: &DataDir,
    ctx: &LoadContext,
    persistence_enabled: bool,
) -> Result<Hydrated, PersistenceError> {
    let queue = match DataDir::locate(dir.queue_path(), dir.legacy_queue_path()) {
        Some(path) => {
            let loaded = load_located(&queue_chain()?, &path, &dir.legacy_queue_path(), ctx)?;
            tracing::info!(
                path = %path.display(),
                version = loaded.from_version,
                levels = loaded.data.state.len(),
                "Loaded queue"
            );
            let target = dir.queue_path();
            loaded.commit(persistence_enabled, |snapshot| {
                write_json_atomic(&target, &QueueDocument::from(snapshot))
            })?
        }
        None => QueueSnapshot::default(),
    };

    let custom_codes =
        match DataDir::locate(dir.custom_codes_path(), dir.legacy_custom_codes_path()) {
            Some(path) => {
                let loaded = load_located(
                    &custom_codes_chain()?,
                    &path,
                    &dir.legacy_custom_codes_path(),
                    ctx,
                )?;
                tracing::info!(
                    path = %path.display(),
                    version = loaded.from_version,
                    aliases = loaded.data.len(),
                    "Loaded custom codes"
                );
                let target = dir.custom_codes_path();
                loaded.commit(persistence_enabled, |codes| {
                    write_json_atomic(&target, &CustomCodesDocument::from(codes))
                })?
            }
            None => CustomCodes::new(),
        };

    Ok(Hydrated {
        queue,
        custom_codes,
    })
}

/// A file at its legacy location is the chain's unversioned form whatever
/// keys it holds; anything else declares its own version.
fn load_located<T: Any + Send>(
    chain: &VersionChain<T>,
    path: &Path,
    legacy: &Path,
    ctx: &LoadContext,
) -> Result<Loaded<T>, PersistenceError> {
    if path == legacy {
        let version = chain.unversioned_version().unwrap_or_else(|| chain.oldest());
        chain.load_at_version(path, version, ctx)
    } else {
        chain.load(path, ctx)
    }
}

/// Re-read the queue document, which must already be at the newest version.
pub fn reload_queue(dir: &DataDir, ctx: &LoadContext) -> Result<QueueSnapshot, PersistenceError> {
    queue_chain()?.load_newest(&dir.queue_path(), ctx)
}

/// Runtime save path. Hands documents to the background writer; a disabled
/// persister accepts and drops them.
#[derive(Debug, Clone)]
pub struct Persister {
    dir: DataDir,
    writer: Option<DocumentWriter>,
}

impl Persister {
    pub fn new(dir: DataDir, writer: DocumentWriter) -> Self {
        Self {
            dir,
            writer: Some(writer),
        }
    }

    pub fn disabled(dir: DataDir) -> Self {
        Self { dir, writer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn dir(&self) -> &DataDir {
        &self.dir
    }

    pub fn save_queue(&self, state: &QueueState, ledger: &WaitLedger) -> Result<(), PersistenceError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let body = serde_json::to_value(QueueDocument::from_parts(state, ledger))?;
        writer.submit(self.dir.queue_path(), body)
    }

    pub fn save_custom_codes(&self, codes: &CustomCodes) -> Result<(), PersistenceError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let body = serde_json::to_value(CustomCodesDocument::from(codes))?;
        writer.submit(self.dir.custom_codes_path(), body)
    }

    /// Wait for submitted documents to reach disk.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        match &self.writer {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }
}
