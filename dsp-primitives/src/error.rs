//! Shared error definitions for connector primitives.

use thiserror::Error;

/// Result alias used throughout the connector.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating primitive types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// An identifier that must carry a value was blank.
    #[error("{kind} cannot be blank")]
    BlankIdentifier {
        /// Which identifier was rejected.
        kind: &'static str,
    },
}
