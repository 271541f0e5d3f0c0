#![deny(missing_docs)]
//! dsflow_core: batch job model, schedule compilation, parameter expansion
//! and batch planning, plus the config/store/logging helpers around them.

/// Configuration helpers (AppId, dirs, load_or_init, etc.)
pub mod cfg;
/// Error taxonomy shared by every stage.
pub mod error;
/// Cartesian/sequential expansion into execution units.
pub mod expand;
/// Resolve, expand and plan one firing.
pub mod firing;
/// Job definition model, form shape and dimension staging.
pub mod job;
/// Tracing/log initialization helpers.
pub mod logx;
/// Batch planning and the execution plan handed to executors.
pub mod plan;
/// Schedule compiler and cron expression checks.
pub mod schedule;
/// Value source resolution and collaborator traits.
pub mod source;
/// File-backed KV store and the job store on top of it.
pub mod store;
/// Cross-field job validation.
pub mod validate;

pub use error::{ExpansionError, FieldViolation, FiringError, ResolveError, ScheduleError, ValidationError};
pub use job::{JobForm, JobSpec, JobSpecBuilder};
pub use plan::ExecutionPlan;
