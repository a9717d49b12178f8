//! Background document writer.
//!
//! Callers hand over the latest serialized form of a document and move on.
//! A single consumer task drains the channel, keeps only the newest body per
//! path, and writes each on the blocking pool. Writes to one file are never
//! in flight concurrently.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::atomic::write_json_atomic;
use crate::error::PersistenceError;

enum WriteRequest {
    Write { path: PathBuf, body: serde_json::Value },
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. Cloning shares the same task.
#[derive(Debug, Clone)]
pub struct DocumentWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl DocumentWriter {
    /// Start the writer task. It exits once every handle is dropped and the
    /// backlog is written.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx));
        (Self { tx }, handle)
    }

    /// Queue `body` for `path`, replacing any not-yet-written body for the
    /// same path.
    pub fn submit(&self, path: PathBuf, body: serde_json::Value) -> Result<(), PersistenceError> {
        self.tx
            .send(WriteRequest::Write { path, body })
            .map_err(|_| PersistenceError::WriterClosed)
    }

    /// Wait until everything submitted before this call is on disk.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest::Flush(done_tx))
            .map_err(|_| PersistenceError::WriterClosed)?;
        done_rx.await.map_err(|_| PersistenceError::WriterClosed)
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(first) = rx.recv().await {
        let mut pending: BTreeMap<PathBuf, serde_json::Value> = BTreeMap::new();
        let mut waiters = Vec::new();

        let mut absorb = |request: WriteRequest| match request {
            WriteRequest::Write { path, body } => {
                pending.insert(path, body);
            }
            WriteRequest::Flush(done) => waiters.push(done),
        };
        absorb(first);
        while let Ok(next) = rx.try_recv() {
            absorb(next);
        }

        for (path, body) in pending {
            let target = path.clone();
            let result = tokio::task::spawn_blocking(move || write_json_atomic(&target, &body)).await;
            match result {
                Ok(Ok(())) => tracing::debug!(path = %path.display(), "Document written"),
                Ok(Err(e)) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to write document")
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Document write task failed")
                }
            }
        }

        for done in waiters {
            let _ = done.send(());
        }
    }
    tracing::info!("Document writer shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_body_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let (writer, handle) = DocumentWriter::spawn();

        for n in 0..20 {
            writer
                .submit(path.clone(), serde_json::json!({ "n": n }))
                .unwrap();
        }
        writer.flush().await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["n"], 19);

        drop(writer);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn backlog_is_written_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let (writer, handle) = DocumentWriter::spawn();
        writer.submit(path.clone(), serde_json::json!([1])).unwrap();
        drop(writer);
        handle.await.unwrap();
        assert!(path.exists());
    }
}
