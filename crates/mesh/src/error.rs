//! Error types for Datamesh mesh operations.
//!
//! Covers the wire protocol, the registry store, and the transport. Errors
//! never escape a connection task; the gateway turns them into a protocol
//! reply or a closed connection.

use datamesh_domain::DomainError;
use datamesh_trust_mesh::TrustMeshError;
use thiserror::Error;

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Registration or lookup for an address without a registry record
    #[error("Unknown domain: {address}")]
    UnknownDomain {
        /// Address that has not announced itself
        address: String,
    },

    /// Consume request for a product the target does not own
    #[error("Product '{product}' not found on {owner}")]
    ProductNotFound {
        /// Requested product name
        product: String,
        /// Domain that was asked
        owner: String,
    },

    /// Trust evaluation refused the caller
    #[error("Authentication rejected for {address}")]
    AuthenticationRejected {
        /// Address that was refused
        address: String,
    },

    /// Payload could not be parsed as the expected message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Peer answered with something the exchange does not allow
    #[error("Unexpected reply: expected {expected}, got {got:?}")]
    UnexpectedReply {
        /// What the exchange expected
        expected: String,
        /// What arrived
        got: String,
    },

    /// Frame length prefix above the accepted maximum
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Command is valid but not served by this endpoint
    #[error("Command '{0}' is not served here")]
    UnsupportedCommand(String),

    /// Address cannot be used as a registry key
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Declared origin does not belong to the connecting host
    #[error("Origin {origin} does not match peer {peer}")]
    OriginMismatch {
        /// Origin on the command line
        origin: String,
        /// IP the connection came from
        peer: String,
    },

    /// Peer closed the connection mid-exchange
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid lifecycle state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Domain model errors
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Audit log errors
    #[error("Audit error: {0}")]
    Audit(#[from] TrustMeshError),
}

impl MeshError {
    /// Transport failures invalidate the whole exchange; callers retry from
    /// the first command.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MeshError::Io(_) | MeshError::ConnectionClosed | MeshError::Timeout(_)
        )
    }

    /// Whether the remedy is to announce again before retrying
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            MeshError::AuthenticationRejected { .. } | MeshError::UnknownDomain { .. }
        )
    }
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
