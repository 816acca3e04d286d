//! Trust Mesh Service
//!
//! This crate implements the trust side of the data mesh:
//! - An append-only audit log of per-address events
//! - The trust evaluator that gates `discover` and `consume`
//!
//! The evaluator is also a writer to the audit log; neither holds the log
//! lock across the other's call.

pub mod audit;
pub mod error;
pub mod trust;

pub use audit::{
    AuditEntry, AuditLog, DEFAULT_RETENTION, EVENT_AUTH_ERROR, EVENT_AUTH_REJECT, EVENT_DISCOVER,
    EVENT_HELLO, EVENT_REGISTRATION,
};
pub use error::{Result, TrustMeshError};
pub use trust::{Action, TrustDecision, TrustEvaluator};
