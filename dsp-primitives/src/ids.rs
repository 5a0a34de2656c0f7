//! Correlation identifiers exchanged between negotiating parties.
//!
//! Each party issues its own half of the pid pair. Identifiers are opaque
//! strings on the wire; locally generated ones use the `urn:uuid:` form.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh `urn:uuid:` identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("urn:uuid:{}", Uuid::new_v4()))
            }

            /// Wraps an existing identifier, rejecting blank values.
            ///
            /// # Errors
            ///
            /// Returns [`Error::BlankIdentifier`] when the value is empty or
            /// whitespace only.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(Error::BlankIdentifier { kind: $kind });
                }
                Ok(Self(value))
            }

            /// Returns the blank identifier.
            #[must_use]
            pub const fn blank() -> Self {
                Self(String::new())
            }

            /// Returns `true` when no value has been assigned yet.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

opaque_id!(
    /// Correlation identifier issued by the provider.
    ProviderPid,
    "providerPid"
);

opaque_id!(
    /// Correlation identifier issued by the consumer.
    ConsumerPid,
    "consumerPid"
);

opaque_id!(
    /// Identifier of a finalized usage agreement.
    AgreementId,
    "agreementId"
);

/// The `(providerPid, consumerPid)` pair identifying one negotiation.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidPair {
    provider_pid: ProviderPid,
    consumer_pid: ConsumerPid,
}

impl PidPair {
    /// Creates a pair from both halves.
    #[must_use]
    pub fn new(provider_pid: ProviderPid, consumer_pid: ConsumerPid) -> Self {
        Self {
            provider_pid,
            consumer_pid,
        }
    }

    /// Returns the provider half.
    #[must_use]
    pub fn provider_pid(&self) -> &ProviderPid {
        &self.provider_pid
    }

    /// Returns the consumer half.
    #[must_use]
    pub fn consumer_pid(&self) -> &ConsumerPid {
        &self.consumer_pid
    }

    /// Returns `true` once both halves have been assigned.
    #[must_use]
    pub fn is_established(&self) -> bool {
        !self.provider_pid.is_blank() && !self.consumer_pid.is_blank()
    }
}

impl Display for PidPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.provider_pid, self.consumer_pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_urn_uuids() {
        let pid = ProviderPid::generate();
        assert!(pid.as_str().starts_with("urn:uuid:"));
        assert!(!pid.is_blank());
        assert_ne!(pid, ProviderPid::generate());
    }

    #[test]
    fn new_rejects_blank_values() {
        let err = ConsumerPid::new("   ").expect_err("blank should fail");
        assert_eq!(
            err,
            Error::BlankIdentifier {
                kind: "consumerPid"
            }
        );
        assert!(ConsumerPid::blank().is_blank());
    }

    #[test]
    fn pair_is_established_only_with_both_halves() {
        let pair = PidPair::new(ProviderPid::blank(), ConsumerPid::from("urn:uuid:c1"));
        assert!(!pair.is_established());

        let pair = PidPair::new(ProviderPid::from("urn:uuid:p1"), ConsumerPid::from("urn:uuid:c1"));
        assert!(pair.is_established());
        assert_eq!(pair.to_string(), "(urn:uuid:p1, urn:uuid:c1)");
    }

    #[test]
    fn serializes_transparently() {
        let pid = AgreementId::from("urn:uuid:a1");
        let json = serde_json::to_string(&pid).unwrap();
        assert_eq!(json, "\"urn:uuid:a1\"");
    }
}
