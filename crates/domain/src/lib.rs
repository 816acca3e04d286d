//! Domain module for the Datamesh coordination system
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - Data products and their artifacts
//! - Registry records and catalog entries
//! - The peer lifecycle state machine

pub mod error;
pub mod lifecycle;
pub mod model;

pub use error::{DomainError, Result};
pub use lifecycle::{LifecycleState, LifecycleTransition, PeerLifecycle};
pub use model::{
    current_timestamp_ms, Artifact, DataProduct, DomainRecord, ProductCatalogEntry,
};
