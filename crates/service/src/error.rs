use levelq_persistence::PersistenceError;

/// Failures that stop the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to load stored queue: {0}")]
    Persistence(#[from] PersistenceError),
}
