//! Enforcement decisions returned to policy enforcement points.

use serde::{Deserialize, Serialize};

/// Allow/deny outcome of evaluating an agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    allowed: bool,
    message: String,
}

impl Decision {
    /// Returns an allow decision.
    #[must_use]
    pub fn allow(message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            message: message.into(),
        }
    }

    /// Returns a deny decision with an explanatory reason.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: message_or_default(reason.into()),
        }
    }

    /// Returns true when access may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Returns the human-readable explanation.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

fn message_or_default(message: String) -> String {
    if message.trim().is_empty() {
        "access denied".to_owned()
    } else {
        message
    }
}
