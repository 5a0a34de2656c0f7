//! Offer validation against the provider's published catalog offers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::model::Offer;

/// Decides whether an inbound offer still matches something the provider
/// is willing to grant.
#[async_trait]
pub trait OfferValidator: Send + Sync {
    /// Returns `true` when the offer is acceptable.
    async fn is_offer_still_valid(&self, offer: &Offer) -> bool;
}

/// Validator backed by a set of published offers keyed by offer id.
///
/// An inbound offer is valid when an offer with the same id is published,
/// targets the same asset, and every inbound permission is found among the
/// published ones (see [`crate::compare_collection`]).
#[derive(Debug, Default)]
pub struct CatalogOfferValidator {
    offers: RwLock<HashMap<String, Offer>>,
}

impl CatalogOfferValidator {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an offer, replacing any previous offer with the same id.
    pub fn publish(&self, offer: Offer) {
        self.offers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(offer.id().to_owned(), offer);
    }

    /// Withdraws an offer. Returns `true` when it was published.
    pub fn withdraw(&self, offer_id: &str) -> bool {
        self.offers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(offer_id)
            .is_some()
    }
}

#[async_trait]
impl OfferValidator for CatalogOfferValidator {
    async fn is_offer_still_valid(&self, offer: &Offer) -> bool {
        let guard = self.offers.read().unwrap_or_else(PoisonError::into_inner);
        let Some(published) = guard.get(offer.id()) else {
            debug!(offer_id = offer.id(), "offer not published");
            return false;
        };
        let valid = offer.has_same_terms(published);
        if !valid {
            debug!(offer_id = offer.id(), "offer terms differ from catalog");
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Constraint, Permission};
    use crate::vocabulary::{Action, LeftOperand, Operator};

    fn offer(limit: &str) -> Offer {
        Offer::new("urn:offer:1", "urn:asset:1", "provider", "consumer").with_permission(
            Permission::new(Action::Use)
                .with_constraint(Constraint::new(LeftOperand::Count, Operator::Lteq, limit)),
        )
    }

    #[tokio::test]
    async fn published_offer_is_valid() {
        let catalog = CatalogOfferValidator::new();
        catalog.publish(offer("5"));

        assert!(catalog.is_offer_still_valid(&offer("5")).await);
        assert!(!catalog.is_offer_still_valid(&offer("50")).await);
    }

    #[tokio::test]
    async fn withdrawn_offer_is_invalid() {
        let catalog = CatalogOfferValidator::new();
        catalog.publish(offer("5"));
        assert!(catalog.withdraw("urn:offer:1"));

        assert!(!catalog.is_offer_still_valid(&offer("5")).await);
    }

    #[tokio::test]
    async fn inbound_offer_dropping_a_permission_still_matches() {
        let catalog = CatalogOfferValidator::new();
        catalog.publish(offer("5").with_permission(Permission::new(Action::Read)));

        // Containment check: the inbound offer only needs to be a subset.
        assert!(catalog.is_offer_still_valid(&offer("5")).await);
    }
}
