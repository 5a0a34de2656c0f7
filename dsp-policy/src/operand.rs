//! Normalization of polymorphically encoded constraint operands.
//!
//! Peers encode `leftOperand` and `operator` either as a plain token
//! (`"odrl:count"`), as a reference object (`{"@id": "odrl:count"}`), or the
//! value is constructed locally as an already resolved symbol. Everything that
//! compares or evaluates operands goes through [`resolve_operand`].

use serde::{Deserialize, Serialize};

use crate::error::PolicyResult;
use crate::vocabulary::Vocabulary;

/// Operand value as it arrived, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOperand<T> {
    /// Symbol constructed locally.
    #[serde(skip_deserializing)]
    Symbol(T),
    /// Plain string token.
    Token(String),
    /// Reference object carrying the token in its identifier field.
    Reference {
        /// Referenced vocabulary token.
        #[serde(rename = "@id", alias = "id")]
        id: String,
    },
}

impl<T> RawOperand<T> {
    /// Wraps a plain token.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    /// Wraps a reference object identifier.
    #[must_use]
    pub fn reference(id: impl Into<String>) -> Self {
        Self::Reference { id: id.into() }
    }
}

impl<T> From<T> for RawOperand<T>
where
    T: Vocabulary,
{
    fn from(value: T) -> Self {
        Self::Symbol(value)
    }
}

/// Normalizes a raw operand into its canonical symbol.
///
/// # Errors
///
/// Returns [`crate::PolicyError::UnknownToken`] when the token or reference
/// does not name a known symbol.
pub fn resolve_operand<T: Vocabulary>(raw: &RawOperand<T>) -> PolicyResult<T> {
    match raw {
        RawOperand::Symbol(symbol) => Ok(*symbol),
        RawOperand::Token(token) => T::lookup(token),
        RawOperand::Reference { id } => T::lookup(id),
    }
}
