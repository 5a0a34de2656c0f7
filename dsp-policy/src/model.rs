//! Offer, permission, constraint, and agreement representations.

use chrono::{DateTime, Utc};
use dsp_primitives::AgreementId;
use serde::{Deserialize, Serialize};

use crate::error::PolicyResult;
use crate::operand::{RawOperand, resolve_operand};
use crate::vocabulary::{Action, LeftOperand, Operator};

/// Scans `b` for every element of `a`, stopping at the first match.
///
/// Returns `false` as soon as one element of `a` has no counterpart in `b`.
/// This is a containment check of `a` in `b`, not set equality: elements of
/// `b` that nothing in `a` matched are never inspected, and duplicates in `a`
/// may all match the same element of `b`.
pub fn compare_collection<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    a.iter().all(|left| b.iter().any(|right| eq(left, right)))
}

/// `(leftOperand, operator, rightOperand)` rule limiting a permission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    left_operand: RawOperand<LeftOperand>,
    operator: RawOperand<Operator>,
    right_operand: String,
}

impl Constraint {
    /// Creates a constraint from raw or resolved operands.
    #[must_use]
    pub fn new(
        left_operand: impl Into<RawOperand<LeftOperand>>,
        operator: impl Into<RawOperand<Operator>>,
        right_operand: impl Into<String>,
    ) -> Self {
        Self {
            left_operand: left_operand.into(),
            operator: operator.into(),
            right_operand: right_operand.into(),
        }
    }

    /// Returns the left operand as it was received.
    #[must_use]
    pub fn raw_left_operand(&self) -> &RawOperand<LeftOperand> {
        &self.left_operand
    }

    /// Returns the operator as it was received.
    #[must_use]
    pub fn raw_operator(&self) -> &RawOperand<Operator> {
        &self.operator
    }

    /// Returns the right operand.
    #[must_use]
    pub fn right_operand(&self) -> &str {
        &self.right_operand
    }

    /// Resolves the left operand.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PolicyError::UnknownToken`] for unknown operands.
    pub fn left_operand(&self) -> PolicyResult<LeftOperand> {
        resolve_operand(&self.left_operand)
    }

    /// Resolves the operator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PolicyError::UnknownToken`] for unknown operators.
    pub fn operator(&self) -> PolicyResult<Operator> {
        resolve_operand(&self.operator)
    }

    /// Structural equality after operand normalization.
    ///
    /// The right operands are compared verbatim. A constraint with an
    /// unresolvable operand is not equivalent to anything, itself included.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        let (Ok(left), Ok(other_left)) = (self.left_operand(), other.left_operand()) else {
            return false;
        };
        let (Ok(operator), Ok(other_operator)) = (self.operator(), other.operator()) else {
            return false;
        };
        left == other_left && operator == other_operator && self.right_operand == other.right_operand
    }

    /// Short label used in logs and deny messages.
    #[must_use]
    pub fn label(&self) -> String {
        let left = self
            .left_operand()
            .map_or_else(|_| "<unresolved>".to_owned(), |operand| operand.to_string());
        let operator = self
            .operator()
            .map_or_else(|_| "<unresolved>".to_owned(), |operator| operator.to_string());
        format!("{left} {operator} {}", self.right_operand)
    }
}

/// Permission granting an action, optionally narrowed by constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assigner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assignee: Option<String>,
    #[serde(default, rename = "constraint")]
    constraints: Vec<Constraint>,
}

impl Permission {
    /// Creates an unconstrained permission for the action.
    #[must_use]
    pub fn new(action: Action) -> Self {
        Self {
            action,
            target: None,
            assigner: None,
            assignee: None,
            constraints: Vec::new(),
        }
    }

    /// Adds a constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Overrides the permission target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Overrides the assigner.
    #[must_use]
    pub fn with_assigner(mut self, assigner: impl Into<String>) -> Self {
        self.assigner = Some(assigner.into());
        self
    }

    /// Overrides the assignee.
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// Returns the granted action.
    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    /// Returns the target override, if any.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Returns the assigner override, if any.
    #[must_use]
    pub fn assigner(&self) -> Option<&str> {
        self.assigner.as_deref()
    }

    /// Returns the assignee override, if any.
    #[must_use]
    pub fn assignee(&self) -> Option<&str> {
        self.assignee.as_deref()
    }

    /// Returns the constraints.
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Same action and every constraint found in `other`.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.action == other.action
            && compare_collection(&self.constraints, &other.constraints, Constraint::is_equivalent)
    }
}

/// Proposed usage policy for one data asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    #[serde(rename = "@id")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_id: Option<String>,
    target: String,
    assigner: String,
    assignee: String,
    #[serde(default, rename = "permission")]
    permissions: Vec<Permission>,
}

impl Offer {
    /// Creates an offer without permissions.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        target: impl Into<String>,
        assigner: impl Into<String>,
        assignee: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            original_id: None,
            target: target.into(),
            assigner: assigner.into(),
            assignee: assignee.into(),
            permissions: Vec::new(),
        }
    }

    /// Adds a permission.
    #[must_use]
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Returns a copy carrying the lineage back-reference.
    #[must_use]
    pub fn with_original_id(mut self, original_id: impl Into<String>) -> Self {
        self.original_id = Some(original_id.into());
        self
    }

    /// Returns the offer identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the id of the counterpart's offer this one descends from.
    #[must_use]
    pub fn original_id(&self) -> Option<&str> {
        self.original_id.as_deref()
    }

    /// Returns the target asset id.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the assigner (provider participant).
    #[must_use]
    pub fn assigner(&self) -> &str {
        &self.assigner
    }

    /// Returns the assignee (consumer participant).
    #[must_use]
    pub fn assignee(&self) -> &str {
        &self.assignee
    }

    /// Returns the permissions.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Same target and every permission found in `other`.
    #[must_use]
    pub fn has_same_terms(&self, other: &Self) -> bool {
        self.target == other.target
            && compare_collection(&self.permissions, &other.permissions, Permission::is_equivalent)
    }

    /// Returns `true` when target and both parties match.
    #[must_use]
    pub fn covers(&self, target: &str, assigner: &str, assignee: &str) -> bool {
        self.target == target && self.assigner == assigner && self.assignee == assignee
    }
}

/// Immutable usage agreement derived from an accepted offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    #[serde(rename = "@id")]
    id: AgreementId,
    target: String,
    assigner: String,
    assignee: String,
    timestamp: DateTime<Utc>,
    #[serde(default, rename = "permission")]
    permissions: Vec<Permission>,
}

impl Agreement {
    /// Freezes an accepted offer into an agreement.
    #[must_use]
    pub fn from_offer(offer: &Offer, id: AgreementId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            target: offer.target.clone(),
            assigner: offer.assigner.clone(),
            assignee: offer.assignee.clone(),
            timestamp,
            permissions: offer.permissions.clone(),
        }
    }

    /// Returns the agreement identifier.
    #[must_use]
    pub fn id(&self) -> &AgreementId {
        &self.id
    }

    /// Returns the target asset id.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the assigner.
    #[must_use]
    pub fn assigner(&self) -> &str {
        &self.assigner
    }

    /// Returns the assignee.
    #[must_use]
    pub fn assignee(&self) -> &str {
        &self.assignee
    }

    /// Returns when the agreement was reached.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the agreed permissions.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }
}
