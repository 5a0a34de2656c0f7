//! Built-in constraint handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::engine::{ConstraintHandler, EnforcementContext};
use crate::error::{PolicyError, PolicyResult};
use crate::integrations::AccessCounter;
use crate::vocabulary::Operator;

/// Compares the agreement's access count with a numeric limit.
pub struct CountHandler {
    counter: Arc<dyn AccessCounter>,
}

impl CountHandler {
    /// Creates a handler reading counts from the supplied port.
    #[must_use]
    pub fn new(counter: Arc<dyn AccessCounter>) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl ConstraintHandler for CountHandler {
    async fn evaluate(
        &self,
        operator: Operator,
        right_operand: &str,
        context: &EnforcementContext,
    ) -> PolicyResult<bool> {
        let limit: u64 = right_operand
            .trim()
            .parse()
            .map_err(|err: std::num::ParseIntError| PolicyError::InvalidRightOperand {
                value: right_operand.to_owned(),
                reason: err.to_string(),
            })?;
        let count = self.counter.access_count(context.agreement_id()).await?;
        operator.compare(&count, &limit)
    }
}

/// Compares the evaluation instant with a timestamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct DateTimeHandler;

#[async_trait]
impl ConstraintHandler for DateTimeHandler {
    async fn evaluate(
        &self,
        operator: Operator,
        right_operand: &str,
        context: &EnforcementContext,
    ) -> PolicyResult<bool> {
        let timestamp = parse_timestamp(right_operand)?;
        operator.compare(&context.now(), &timestamp)
    }
}

/// Parses RFC 3339 timestamps; offset-less values are taken as UTC.
///
/// # Errors
///
/// Returns [`PolicyError::InvalidRightOperand`] when neither form parses.
pub fn parse_timestamp(value: &str) -> PolicyResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| PolicyError::InvalidRightOperand {
            value: value.to_owned(),
            reason: err.to_string(),
        })
}

/// Matches the declared purpose against one or more allowed purposes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PurposeHandler;

#[async_trait]
impl ConstraintHandler for PurposeHandler {
    async fn evaluate(
        &self,
        operator: Operator,
        right_operand: &str,
        context: &EnforcementContext,
    ) -> PolicyResult<bool> {
        let purpose = context
            .purpose()
            .ok_or(PolicyError::MissingEvidence("declared purpose"))?;
        let mut listed = right_operand.split(',').map(str::trim);
        match operator {
            Operator::Eq => Ok(purpose == right_operand),
            Operator::Neq => Ok(purpose != right_operand),
            Operator::IsAnyOf => Ok(listed.any(|candidate| candidate == purpose)),
            Operator::IsNoneOf => Ok(listed.all(|candidate| candidate != purpose)),
            _ => Err(PolicyError::UnsupportedOperator {
                operator,
                context: "purpose",
            }),
        }
    }
}
