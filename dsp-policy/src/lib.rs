//! ODRL policy model and enforcement for dataspace agreements.
//!
//! The model side covers offers, permissions, and constraints together with
//! operand normalization and structural equality. The enforcement side
//! evaluates a finalized [`Agreement`] against runtime evidence and always
//! answers with a [`Decision`], denying whenever evaluation is not possible.

#![warn(missing_docs, clippy::pedantic)]

pub mod decision;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod integrations;
pub mod model;
pub mod operand;
pub mod validation;
pub mod vocabulary;

pub use decision::Decision;
pub use engine::{ConstraintHandler, EnforcementContext, PolicyEnforcer};
pub use error::{PolicyError, PolicyResult};
pub use handlers::{CountHandler, DateTimeHandler, PurposeHandler, parse_timestamp};
pub use integrations::{
    AccessCounter, InMemoryAccessCounter, InMemoryPolicyAdministration, PolicyAdministration,
};
pub use model::{Agreement, Constraint, Offer, Permission, compare_collection};
pub use operand::{RawOperand, resolve_operand};
pub use validation::{CatalogOfferValidator, OfferValidator};
pub use vocabulary::{Action, LeftOperand, ODRL_NAMESPACE, Operator, Vocabulary};
