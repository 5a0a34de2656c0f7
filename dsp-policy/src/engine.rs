//! Policy enforcement engine evaluating agreements against runtime evidence.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dsp_primitives::AgreementId;
use tracing::{debug, warn};

use crate::decision::Decision;
use crate::error::{PolicyError, PolicyResult};
use crate::handlers::{CountHandler, DateTimeHandler, PurposeHandler};
use crate::integrations::AccessCounter;
use crate::model::{Agreement, Constraint};
use crate::vocabulary::{LeftOperand, Operator};

/// Runtime evidence an agreement is evaluated against.
#[derive(Debug, Clone)]
pub struct EnforcementContext {
    agreement_id: AgreementId,
    now: DateTime<Utc>,
    purpose: Option<String>,
}

impl EnforcementContext {
    /// Creates a context for the agreement evaluated at the current time.
    #[must_use]
    pub fn new(agreement_id: AgreementId) -> Self {
        Self {
            agreement_id,
            now: Utc::now(),
            purpose: None,
        }
    }

    /// Evaluates at a fixed instant instead of the current time.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Declares the purpose the asset is being used for.
    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Returns the agreement identifier.
    #[must_use]
    pub fn agreement_id(&self) -> &AgreementId {
        &self.agreement_id
    }

    /// Returns the evaluation instant.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Returns the declared purpose, if any.
    #[must_use]
    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref()
    }
}

/// Evaluates constraints for one left operand.
#[async_trait]
pub trait ConstraintHandler: Send + Sync {
    /// Returns whether `evidence OP right_operand` currently holds.
    async fn evaluate(
        &self,
        operator: Operator,
        right_operand: &str,
        context: &EnforcementContext,
    ) -> PolicyResult<bool>;
}

/// Fail-closed evaluator over a table of operand handlers.
#[derive(Clone, Default)]
pub struct PolicyEnforcer {
    handlers: HashMap<LeftOperand, Arc<dyn ConstraintHandler>>,
}

impl fmt::Debug for PolicyEnforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operands: Vec<_> = self.handlers.keys().map(ToString::to_string).collect();
        operands.sort();
        f.debug_struct("PolicyEnforcer")
            .field("operands", &operands)
            .finish()
    }
}

impl PolicyEnforcer {
    /// Creates an enforcer with no handlers; every constraint denies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an enforcer with the count, date-time, and purpose handlers.
    #[must_use]
    pub fn with_default_handlers(counter: Arc<dyn AccessCounter>) -> Self {
        Self::new()
            .with_handler(LeftOperand::Count, Arc::new(CountHandler::new(counter)))
            .with_handler(LeftOperand::DateTime, Arc::new(DateTimeHandler))
            .with_handler(LeftOperand::Purpose, Arc::new(PurposeHandler))
    }

    /// Registers a handler, replacing any previous one for the operand.
    #[must_use]
    pub fn with_handler(mut self, operand: LeftOperand, handler: Arc<dyn ConstraintHandler>) -> Self {
        self.register_handler(operand, handler);
        self
    }

    /// Registers a handler, returning the one it replaced.
    pub fn register_handler(
        &mut self,
        operand: LeftOperand,
        handler: Arc<dyn ConstraintHandler>,
    ) -> Option<Arc<dyn ConstraintHandler>> {
        self.handlers.insert(operand, handler)
    }

    /// Evaluates every constraint of every permission.
    ///
    /// Access is allowed only when all constraints hold. A constraint that
    /// fails, cannot be resolved, or whose evidence lookup errors denies, as
    /// does a context gathered for another agreement.
    pub async fn enforce_policy(
        &self,
        agreement: &Agreement,
        context: &EnforcementContext,
    ) -> Decision {
        if context.agreement_id() != agreement.id() {
            warn!(
                agreement_id = %agreement.id(),
                context_agreement_id = %context.agreement_id(),
                "enforcement context belongs to another agreement; denying"
            );
            return Decision::deny(format!(
                "enforcement context is for agreement {}, not {}",
                context.agreement_id(),
                agreement.id()
            ));
        }

        for permission in agreement.permissions() {
            for constraint in permission.constraints() {
                match self.evaluate_constraint(constraint, context).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            agreement_id = %agreement.id(),
                            constraint = %constraint.label(),
                            "constraint not satisfied"
                        );
                        return Decision::deny(format!(
                            "constraint `{}` not satisfied",
                            constraint.label()
                        ));
                    }
                    Err(err) => {
                        warn!(
                            agreement_id = %agreement.id(),
                            constraint = %constraint.label(),
                            %err,
                            "constraint evaluation failed; denying"
                        );
                        return Decision::deny(format!(
                            "constraint `{}` could not be evaluated: {err}",
                            constraint.label()
                        ));
                    }
                }
            }
        }

        Decision::allow("all constraints satisfied")
    }

    async fn evaluate_constraint(
        &self,
        constraint: &Constraint,
        context: &EnforcementContext,
    ) -> PolicyResult<bool> {
        let operand = constraint.left_operand()?;
        let operator = constraint.operator()?;
        let handler = self
            .handlers
            .get(&operand)
            .ok_or(PolicyError::UnsupportedLeftOperand(operand))?;
        handler
            .evaluate(operator, constraint.right_operand(), context)
            .await
    }
}
