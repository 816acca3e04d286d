//! Core functionality for the Datamesh coordination system.
//!
//! This crate provides the configuration, error, and logging plumbing shared
//! by the platform and domain processes.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{DomainConfig, PlatformConfig};
pub use error::{CoreError, Result};
