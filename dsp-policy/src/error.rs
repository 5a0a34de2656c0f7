//! Errors surfaced by the policy model and its collaborators.

use dsp_primitives::AgreementId;
use thiserror::Error;

use crate::vocabulary::{LeftOperand, Operator};

/// Errors surfaced by policy resolution, evaluation, and backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A vocabulary token did not match any known symbol.
    #[error("unrecognized ODRL {kind} token `{token}`")]
    UnknownToken {
        /// Symbol set the token was looked up in.
        kind: &'static str,
        /// The offending token.
        token: String,
    },
    /// The operator has no meaning for the operand being evaluated.
    #[error("operator {operator} is not supported for {context}")]
    UnsupportedOperator {
        /// Operator carried by the constraint.
        operator: Operator,
        /// What the operator was applied to.
        context: &'static str,
    },
    /// No handler is registered for the left operand.
    #[error("no enforcement handler for left operand {0}")]
    UnsupportedLeftOperand(LeftOperand),
    /// The constraint's right operand could not be interpreted.
    #[error("invalid right operand `{value}`: {reason}")]
    InvalidRightOperand {
        /// Raw right operand value.
        value: String,
        /// Why parsing failed.
        reason: String,
    },
    /// Runtime evidence required by a constraint was not supplied.
    #[error("missing enforcement evidence: {0}")]
    MissingEvidence(&'static str),
    /// No enforcement record exists for the agreement.
    #[error("no enforcement record for agreement {0}")]
    EnforcementRecordNotFound(AgreementId),
    /// An enforcement record already exists for the agreement.
    #[error("enforcement record already exists for agreement {0}")]
    EnforcementRecordExists(AgreementId),
    /// Backend integration returned an error.
    #[error("policy backend failure: {reason}")]
    Backend {
        /// Human-readable explanation for logging and operators.
        reason: String,
    },
}

impl PolicyError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
