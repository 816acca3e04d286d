//! Datamesh Mesh - coordination protocol between domains and the platform
//!
//! Domains announce themselves to a central platform, publish named data
//! products, discover what other domains publish, and pull products directly
//! from their owners under a trust decision.
//!
//! # Core Components
//!
//! - **Protocol**: length-prefixed frames and the closed command set
//! - **Registry Store**: the platform's durable map of domains to products
//! - **Platform Gateway**: serves `hello`, `discover`, registration and `authenticate`
//! - **Domain Peer**: announce, publish, discover and consume; serves `consume`
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use datamesh_mesh::{PlatformGateway, RegistryStore};
//! use datamesh_trust_mesh::{AuditLog, TrustEvaluator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), datamesh_mesh::MeshError> {
//! let registry = Arc::new(RegistryStore::in_memory());
//! let trust = TrustEvaluator::new(Arc::new(AuditLog::in_memory()), true, Some(10_000));
//! let gateway = Arc::new(PlatformGateway::new(registry, trust, Duration::from_secs(10)));
//! let handle = gateway.start("127.0.0.1:9000").await?;
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod gateway;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::MeshClient;
pub use error::{MeshError, MeshResult};
pub use gateway::{spawn_lease_sweep, PlatformGateway};
pub use peer::{ConsumePolicy, DomainPeer};
pub use protocol::{AuthRequest, Command, CommandLine, Framed, MAX_FRAME_LEN};
pub use registry::{RegistryStore, PLATFORM_KEY};
pub use server::{serve, spawn_server, ServerHandle};
