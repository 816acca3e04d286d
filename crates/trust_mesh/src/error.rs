//! Trust mesh error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustMeshError {
    /// Audit log file could not be read or written
    #[error("Audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted audit line does not have the `timestamp;address;event` shape
    #[error("Malformed audit entry {line:?}: {reason}")]
    MalformedEntry { line: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TrustMeshError>;
