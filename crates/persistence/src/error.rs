use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt document {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error(
        "Incompatible version {version} in {path}: supported versions are {oldest} to {newest}"
    )]
    IncompatibleVersion {
        path: PathBuf,
        version: i64,
        oldest: u32,
        newest: u32,
    },

    #[error("{path} is at version {version}, newest is {newest}; load and upgrade it first")]
    OutdatedVersion {
        path: PathBuf,
        version: u32,
        newest: u32,
    },

    #[error("Upgrade of {path} to version {version} failed: {reason}")]
    UpgradeFailed {
        path: PathBuf,
        version: u32,
        reason: String,
    },

    #[error("Invalid version chain '{name}': {reason}")]
    InvalidChain { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Document writer has shut down")]
    WriterClosed,
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
