//! Peer lifecycle state machine.
//!
//! A domain must announce itself before it may publish products, and must
//! announce again after the platform has forgotten it (rejection or lease
//! expiry). The client API consults this machine before every exchange.
//!
//! # State Transitions
//!
//! ```text
//! Unregistered
//!     ↓ (on_announced)
//! Announced  ←─┐ (on_announced, idempotent)
//!     ↓ (on_published)
//! Publishing ──┘
//!
//! any ──(reset)──→ Unregistered
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::error::{DomainError, Result};
use crate::model::current_timestamp_ms;

/// Maximum number of state transitions kept in history.
const MAX_HISTORY_SIZE: usize = 64;

/// Where a domain stands with respect to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No `hello` acknowledged yet, or the platform rejected us since
    Unregistered,
    /// `hello` acknowledged; no product registered
    Announced,
    /// At least one product registered
    Publishing,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unregistered => "Unregistered",
            LifecycleState::Announced => "Announced",
            LifecycleState::Publishing => "Publishing",
        };
        f.write_str(name)
    }
}

/// Record of a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    /// Unix epoch milliseconds
    pub timestamp: u64,
    pub reason: Option<String>,
}

/// Lifecycle tracker for one domain peer.
#[derive(Debug, Clone)]
pub struct PeerLifecycle {
    state: LifecycleState,
    history: VecDeque<LifecycleTransition>,
}

impl Default for PeerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerLifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unregistered,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn history(&self) -> &VecDeque<LifecycleTransition> {
        &self.history
    }

    /// Whether the platform is expected to know this peer
    pub fn is_announced(&self) -> bool {
        self.state != LifecycleState::Unregistered
    }

    /// Transition: any → Announced (Publishing stays Publishing)
    pub fn on_announced(&mut self) {
        match self.state {
            LifecycleState::Unregistered => {
                self.transition(LifecycleState::Announced, Some("hello acknowledged"))
            }
            LifecycleState::Announced | LifecycleState::Publishing => {}
        }
    }

    /// Check that publishing is allowed without changing state
    pub fn ensure_can_publish(&self) -> Result<()> {
        match self.state {
            LifecycleState::Unregistered => Err(DomainError::InvalidTransition {
                from: self.state.to_string(),
                to: LifecycleState::Publishing.to_string(),
            }),
            LifecycleState::Announced | LifecycleState::Publishing => Ok(()),
        }
    }

    /// Transition: Announced → Publishing
    pub fn on_published(&mut self) -> Result<()> {
        self.ensure_can_publish()?;
        if self.state == LifecycleState::Announced {
            self.transition(LifecycleState::Publishing, Some("product registered"));
        }
        Ok(())
    }

    /// Transition: any → Unregistered
    pub fn reset(&mut self, reason: &str) {
        if self.state != LifecycleState::Unregistered {
            self.transition(LifecycleState::Unregistered, Some(reason));
        }
    }

    fn transition(&mut self, to: LifecycleState, reason: Option<&str>) {
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(LifecycleTransition {
            from: self.state,
            to,
            timestamp: current_timestamp_ms(),
            reason: reason.map(str::to_string),
        });
        self.state = to;
    }
}
