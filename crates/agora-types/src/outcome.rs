//! Best-effort side effect reporting
//!
//! Operations with auxiliary side effects (identity minting, gas funding,
//! settlement calls) succeed on their primary effect and report every
//! auxiliary failure as a [`Warning`] next to the returned value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A best-effort side effect that did not happen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Side effect that failed, e.g. `mint_identity_token`
    pub operation: String,
    pub message: String,
}

impl Warning {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Warning for a settlement call that returned the zero reference
    pub fn unsettled(operation: impl Into<String>) -> Self {
        Self::new(operation, "settlement backend returned the zero reference")
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}
