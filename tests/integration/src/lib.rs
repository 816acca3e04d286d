//! Integration tests for the data mesh
//!
//! This test suite validates, over real TCP connections:
//! - Announce, publish, discover and consume between domains and the platform
//! - The zero-trust gate and the re-announce recovery path
//! - Registry and audit log persistence
//! - Gateway behaviour on malformed and hostile input

pub mod test_utils;

#[cfg(test)]
mod mesh_scenario_tests;

#[cfg(test)]
mod zero_trust_tests;

#[cfg(test)]
mod persistence_tests;

#[cfg(test)]
mod hostile_input_tests;
