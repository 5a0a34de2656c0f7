//! Closed ODRL symbol sets for actions, left operands, and operators.
//!
//! Lookup is case-insensitive and accepts the compact `odrl:` form, the bare
//! local name, and the full vocabulary IRI. The tables are built once per
//! process and never mutated.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Namespace IRI of the ODRL vocabulary.
pub const ODRL_NAMESPACE: &str = "http://www.w3.org/ns/odrl/2/";

/// Shared behaviour of the closed vocabulary enums.
pub trait Vocabulary: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Human-readable name of the symbol set, used in error messages.
    const KIND: &'static str;

    /// Every member of the symbol set.
    fn all() -> &'static [Self];

    /// Compact ODRL token, e.g. `odrl:use`.
    fn token(self) -> &'static str;

    /// Process-wide lookup table keyed by lower-cased spelling.
    fn table() -> &'static HashMap<String, Self>;

    /// Resolves a raw token into a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownToken`] when no symbol matches.
    fn lookup(token: &str) -> PolicyResult<Self> {
        Self::table()
            .get(&token.trim().to_ascii_lowercase())
            .copied()
            .ok_or_else(|| PolicyError::UnknownToken {
                kind: Self::KIND,
                token: token.to_owned(),
            })
    }
}

fn build_table<T: Vocabulary>() -> HashMap<String, T> {
    let mut table = HashMap::new();
    for symbol in T::all() {
        let token = symbol.token();
        let local = token.strip_prefix("odrl:").unwrap_or(token);
        table.insert(token.to_ascii_lowercase(), *symbol);
        table.insert(local.to_ascii_lowercase(), *symbol);
        table.insert(format!("{ODRL_NAMESPACE}{local}").to_ascii_lowercase(), *symbol);
    }
    table
}

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal, $table:ident {
            $($(#[$vmeta:meta])* $variant:ident => $token:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        static $table: LazyLock<HashMap<String, $name>> = LazyLock::new(build_table::<$name>);

        impl Vocabulary for $name {
            const KIND: &'static str = $kind;

            fn all() -> &'static [Self] {
                &[$(Self::$variant,)+]
            }

            fn token(self) -> &'static str {
                match self {
                    $(Self::$variant => $token,)+
                }
            }

            fn table() -> &'static HashMap<String, Self> {
                &$table
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }

        impl FromStr for $name {
            type Err = PolicyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::lookup(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = PolicyError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::lookup(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.token().to_owned()
            }
        }
    };
}

vocabulary!(
    /// Action a permission grants.
    Action, "action", ACTIONS {
        /// Generic use of the asset.
        Use => "odrl:use",
        /// Read the asset.
        Read => "odrl:read",
        /// Modify the asset.
        Modify => "odrl:modify",
        /// Delete the asset.
        Delete => "odrl:delete",
        /// Distribute the asset to third parties.
        Distribute => "odrl:distribute",
        /// Display the asset.
        Display => "odrl:display",
        /// Anonymize the asset.
        Anonymize => "odrl:anonymize",
        /// Transfer ownership of the asset.
        Transfer => "odrl:transfer",
    }
);

vocabulary!(
    /// Left-hand operand of a constraint.
    LeftOperand, "left operand", LEFT_OPERANDS {
        /// Number of times the asset has been accessed.
        Count => "odrl:count",
        /// Wall-clock date and time.
        DateTime => "odrl:dateTime",
        /// Declared purpose of use.
        Purpose => "odrl:purpose",
        /// Geographic area of use.
        Spatial => "odrl:spatial",
        /// Time elapsed since the agreement was reached.
        ElapsedTime => "odrl:elapsedTime",
    }
);

vocabulary!(
    /// Relational operator of a constraint.
    Operator, "operator", OPERATORS {
        /// Equal to.
        Eq => "odrl:eq",
        /// Not equal to.
        Neq => "odrl:neq",
        /// Greater than.
        Gt => "odrl:gt",
        /// Greater than or equal to.
        Gteq => "odrl:gteq",
        /// Less than.
        Lt => "odrl:lt",
        /// Less than or equal to.
        Lteq => "odrl:lteq",
        /// Instance of.
        IsA => "odrl:isA",
        /// Contains as a part.
        HasPart => "odrl:hasPart",
        /// Is contained in.
        IsPartOf => "odrl:isPartOf",
        /// Matches all of the listed values.
        IsAllOf => "odrl:isAllOf",
        /// Matches any of the listed values.
        IsAnyOf => "odrl:isAnyOf",
        /// Matches none of the listed values.
        IsNoneOf => "odrl:isNoneOf",
    }
);

impl Operator {
    /// Applies a relational operator to two ordered values (`lhs OP rhs`).
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnsupportedOperator`] for set operators, which
    /// have no ordering semantics.
    pub fn compare<T: PartialOrd>(self, lhs: &T, rhs: &T) -> PolicyResult<bool> {
        let holds = match self {
            Self::Eq => lhs == rhs,
            Self::Neq => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Gteq => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Lteq => lhs <= rhs,
            _ => {
                return Err(PolicyError::UnsupportedOperator {
                    operator: self,
                    context: "ordered comparison",
                });
            }
        };
        Ok(holds)
    }
}
