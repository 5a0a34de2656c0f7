//! Negotiation states, roles, and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// States a contract negotiation can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationState {
    /// The consumer proposed (or re-proposed) an offer.
    Requested,
    /// The provider proposed (or countered with) an offer.
    Offered,
    /// The consumer accepted the provider's latest offer.
    Accepted,
    /// The provider issued an agreement.
    Agreed,
    /// The consumer verified the agreement.
    Verified,
    /// The provider confirmed the agreement; enforcement may begin.
    Finalized,
    /// Either party ended the negotiation.
    Terminated,
}

impl NegotiationState {
    /// Returns `true` once no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Terminated)
    }

    /// Returns the `dspace:` state token.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Offered => "OFFERED",
            Self::Accepted => "ACCEPTED",
            Self::Agreed => "AGREED",
            Self::Verified => "VERIFIED",
            Self::Finalized => "FINALIZED",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Side of the negotiation the local connector plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Offers the asset and issues the agreement.
    Provider,
    /// Requests the asset and verifies the agreement.
    Consumer,
}

impl Role {
    /// Returns the other party's role.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Provider => Self::Consumer,
            Self::Consumer => Self::Provider,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider => f.write_str("provider"),
            Self::Consumer => f.write_str("consumer"),
        }
    }
}

use NegotiationState::{Accepted, Agreed, Finalized, Offered, Requested, Terminated, Verified};

/// Transitions a negotiation may take.
///
/// Both parties hold a copy of the same negotiation and apply each message
/// to it, so provider and consumer copies move through one shared table.
pub const TRANSITIONS: &[(NegotiationState, NegotiationState)] = &[
    (Requested, Offered),
    (Requested, Agreed),
    (Requested, Terminated),
    (Offered, Requested),
    (Offered, Accepted),
    (Offered, Terminated),
    (Accepted, Agreed),
    (Accepted, Terminated),
    (Agreed, Verified),
    (Agreed, Terminated),
    (Verified, Finalized),
    (Verified, Terminated),
];

/// Returns `true` when a negotiation may move from `from` to `to`.
#[must_use]
pub fn is_transition_allowed(from: NegotiationState, to: NegotiationState) -> bool {
    TRANSITIONS.contains(&(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NegotiationState; 7] = [
        Requested, Offered, Accepted, Agreed, Verified, Finalized, Terminated,
    ];

    #[test]
    fn terminal_states_have_no_exit() {
        for to in ALL {
            assert!(!is_transition_allowed(Finalized, to));
            assert!(!is_transition_allowed(Terminated, to));
        }
    }

    #[test]
    fn every_open_state_can_terminate() {
        for from in ALL.into_iter().filter(|state| !state.is_terminal()) {
            assert!(is_transition_allowed(from, Terminated), "{from}");
        }
    }

    #[test]
    fn no_self_transitions() {
        for state in ALL {
            assert!(!is_transition_allowed(state, state));
        }
    }

    #[test]
    fn happy_path_is_ordered() {
        let path = [Requested, Offered, Accepted, Agreed, Verified, Finalized];
        for step in path.windows(2) {
            assert!(is_transition_allowed(step[0], step[1]));
            assert!(!is_transition_allowed(step[1], step[0]) || step[0] == Requested);
        }
    }

    #[test]
    fn states_serialize_as_tokens() {
        assert_eq!(serde_json::to_string(&Verified).unwrap(), "\"VERIFIED\"");
        assert_eq!(Role::Provider.counterpart(), Role::Consumer);
    }
}
