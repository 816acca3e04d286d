//! Trust evaluation
//!
//! Single decision point for whether an address may `discover` or `consume`.
//! In open mode every known action is accepted; in zero-trust mode the
//! address needs a logged `Hello`. Every decision is itself audited.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::audit::{AuditLog, EVENT_AUTH_ERROR, EVENT_AUTH_REJECT, EVENT_HELLO};

/// Actions gated by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Discover,
    Consume,
}

impl Action {
    /// Wire word for this action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Discover => "discover",
            Action::Consume => "consume",
        }
    }

    /// Audit event recorded when this action is accepted
    pub fn accept_event(&self) -> String {
        format!("Authentication accept to {} request", self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discover" => Ok(Action::Discover),
            "consume" => Ok(Action::Consume),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// Outcome of evaluating `(action, address)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustDecision {
    Accepted,
    Rejected,
    Error,
}

impl TrustDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TrustDecision::Accepted)
    }
}

/// Evaluator bound to one audit log and one policy
#[derive(Debug, Clone)]
pub struct TrustEvaluator {
    audit: Arc<AuditLog>,
    zero_trust: bool,
    scan_window: Option<usize>,
}

impl TrustEvaluator {
    /// Create an evaluator; `scan_window` bounds the evidence lookup
    pub fn new(audit: Arc<AuditLog>, zero_trust: bool, scan_window: Option<usize>) -> Self {
        Self {
            audit,
            zero_trust,
            scan_window,
        }
    }

    pub fn zero_trust(&self) -> bool {
        self.zero_trust
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Decide whether `address` may perform `action` (wire word).
    ///
    /// An unknown action yields `Error` in either mode. A decision that cannot
    /// be audited is downgraded to `Error`.
    pub async fn evaluate(&self, action: &str, address: &str) -> TrustDecision {
        let (decision, event) = match action.parse::<Action>() {
            Err(reason) => {
                warn!(address = %address, %reason, "Authentication error");
                (TrustDecision::Error, EVENT_AUTH_ERROR.to_string())
            }
            Ok(action) => {
                // lookup and append take the log lock separately
                let accepted = !self.zero_trust
                    || self
                        .audit
                        .has_event(address, EVENT_HELLO, self.scan_window)
                        .await;
                if accepted {
                    info!(address = %address, %action, zero_trust = self.zero_trust, "Authentication accepted");
                    (TrustDecision::Accepted, action.accept_event())
                } else {
                    warn!(address = %address, %action, "Authentication rejected, no prior hello");
                    (TrustDecision::Rejected, EVENT_AUTH_REJECT.to_string())
                }
            }
        };

        if let Err(e) = self.audit.append(&event, address).await {
            error!(address = %address, error = %e, "Failed to audit trust decision");
            return TrustDecision::Error;
        }
        decision
    }
}
