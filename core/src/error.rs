use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Invalid schedule input or cron text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A field the schedule type requires was not supplied.
    #[error("{field} is required for {schedule} schedules")]
    MissingField {
        /// Form field name, e.g. `"dayOfWeek"`.
        field: &'static str,
        /// Schedule type that needs it.
        schedule: &'static str,
    },
    /// A field is outside its domain.
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        /// Form field name.
        field: &'static str,
        /// Supplied value.
        value: u32,
        /// Lowest allowed value.
        min: u32,
        /// Highest allowed value.
        max: u32,
    },
    /// A hand-written cron expression failed the Quartz checks.
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron {
        /// The rejected expression.
        expr: String,
        /// First problem found.
        reason: String,
    },
}

/// Failure turning one value source into values.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Malformed JSON payload in `valueSource`.
    #[error("cannot parse value source: {0}")]
    Parse(String),
    /// Well-formed but semantically invalid source (e.g. start after end).
    #[error("invalid value source: {0}")]
    Invalid(String),
    /// The source was refused by policy (e.g. a mutating SQL statement).
    #[error("value source rejected by policy: {0}")]
    Policy(String),
    /// The external collaborator failed or returned unusable data.
    #[error("value source failed: {0}")]
    Source(String),
    /// A dimension the strategy needs resolved to nothing.
    #[error("parameter {parameter} resolved to no values")]
    EmptySource {
        /// Parameter whose source was empty.
        parameter: String,
    },
}

/// Failure combining resolved dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpansionError {
    /// The cartesian product exceeds the configured ceiling.
    #[error("expansion would produce {units} units, ceiling is {ceiling}")]
    TooLarge {
        /// Units the product would produce (saturating).
        units: u128,
        /// Configured safety ceiling.
        ceiling: usize,
    },
}

/// One violated rule on a job form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Field path, e.g. `"batchSize"` or `"parameterConfigs[2].valueSource"`.
    pub field: String,
    /// Human readable reason.
    pub message: String,
}

impl FieldViolation {
    /// Build a violation for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A job definition was rejected. Carries every violation, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    /// All violated rules, in check order.
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// True if any violation is reported against `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job definition rejected ({} violations)", self.violations.len())?;
        for v in &self.violations {
            write!(f, "; {v}")?;
        }
        Ok(())
    }
}

/// Failure of one scheduled firing. Scoped to that firing only.
#[derive(Debug, Error)]
pub enum FiringError {
    /// A dimension could not be resolved.
    #[error("parameter {parameter}: {source}")]
    Resolve {
        /// Parameter being resolved.
        parameter: String,
        /// Underlying failure.
        #[source]
        source: ResolveError,
    },
    /// The strategy needs dimensions but none are active.
    #[error("job {0} has no active parameter configs")]
    NoActiveDimensions(String),
    /// Expansion hit the safety ceiling.
    #[error(transparent)]
    Expansion(#[from] ExpansionError),
}
