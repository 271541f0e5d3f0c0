//! One firing: resolve the dimensions a job needs, expand, and plan.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExpansionError, FiringError, ResolveError};
use crate::expand::{expand, ResolvedDimension};
use crate::job::{JobSpec, ParameterConfig, ParameterType, ValueSourceType};
use crate::plan::{plan, ExecutionPlan};
use crate::source::{DateRange, Resolver};

/// Guards applied to every firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest number of execution units one firing may produce.
    pub max_units: usize,
}

impl Default for Limits {
    fn default() -> Self { Self { max_units: 10_000 } }
}

/// Active configs the strategy actually reads, in `sortOrder` order.
pub fn required_dimensions(job: &JobSpec) -> Vec<&ParameterConfig> {
    match job.strategy.parameter_type() {
        ParameterType::Single => Vec::new(),
        ParameterType::MultiParam => job.dimensions.active().take(1).collect(),
        ParameterType::Matrix => job.dimensions.active().collect(),
    }
}

// Every unit holds one value of every required dimension, so a single
// dimension longer than the ceiling already breaks it.
fn check_dimension_size(len: usize, limits: Limits) -> Result<(), FiringError> {
    if len > limits.max_units {
        return Err(ExpansionError::TooLarge { units: len as u128, ceiling: limits.max_units }.into());
    }
    Ok(())
}

async fn resolve_one(
    resolver: &Resolver,
    config: &ParameterConfig,
    limits: Limits,
) -> Result<ResolvedDimension, FiringError> {
    let name = config.parameter_name.clone();
    if config.value_source_type == ValueSourceType::DateRange {
        // Parse errors surface from the resolver below with the parameter attached.
        if let Ok(range) = DateRange::parse(&config.value_source) {
            check_dimension_size(range.count(), limits)?;
        }
    }
    let values = resolver
        .resolve(config.value_source_type, &config.value_source)
        .await
        .map_err(|source| FiringError::Resolve { parameter: name.clone(), source })?;
    if values.is_empty() {
        return Err(FiringError::Resolve {
            parameter: name.clone(),
            source: ResolveError::EmptySource { parameter: name },
        });
    }
    check_dimension_size(values.len(), limits)?;
    debug!(parameter = %name, values = values.len(), "dimension resolved");
    Ok(ResolvedDimension { name, values })
}

/// Produce a fresh plan for one firing of `job`.
///
/// Dimensions are resolved concurrently and joined before expansion. The job
/// is only read; a failure here is reported for this firing alone.
pub async fn prepare(job: &JobSpec, resolver: &Resolver, limits: Limits) -> Result<ExecutionPlan, FiringError> {
    let kind = job.strategy.parameter_type();
    let configs = required_dimensions(job);
    if kind != ParameterType::Single && configs.is_empty() {
        return Err(FiringError::NoActiveDimensions(job.job_code.clone()));
    }

    let dims = try_join_all(configs.into_iter().map(|c| resolve_one(resolver, c, limits))).await?;
    let units = expand(kind, &job.base_parameters, &dims, limits.max_units)?;
    let plan = plan(job, units);
    info!(
        job = %job.job_code,
        strategy = %kind,
        units = plan.unit_count(),
        batches = plan.batches.len(),
        "execution plan prepared"
    );
    Ok(plan)
}

/// Result of one firing, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiringOutcome {
    /// Job fired.
    pub job_code: String,
    /// Wall clock at firing (ms since epoch).
    pub fired_at_ms: u64,
    /// Batches dispatched, or the failure.
    pub result: FiringResult,
}

/// Success or failure of a firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FiringResult {
    /// Plan produced and handed over.
    Planned {
        /// Units in the plan.
        units: usize,
        /// Batches in the plan.
        batches: usize,
    },
    /// Resolution or expansion failed.
    Failed {
        /// Rendered error chain.
        error: String,
    },
}

impl FiringOutcome {
    /// Record the result of [`prepare`].
    pub fn from_result(job_code: &str, fired_at_ms: u64, res: &Result<ExecutionPlan, FiringError>) -> Self {
        let result = match res {
            Ok(p) => FiringResult::Planned { units: p.unit_count(), batches: p.batches.len() },
            Err(e) => {
                warn!(job = %job_code, "firing failed: {e}");
                FiringResult::Failed { error: e.to_string() }
            }
        };
        Self { job_code: job_code.to_string(), fired_at_ms, result }
    }

    /// True when a plan was produced.
    pub fn succeeded(&self) -> bool { matches!(self.result, FiringResult::Planned { .. }) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpecBuilder, MethodType, ParameterDraft};
    use crate::schedule::ScheduleType;

    fn list(name: &str, values: &[&str]) -> ParameterDraft {
        ParameterDraft::new(name, ValueSourceType::StaticList, serde_json::to_string(values).unwrap())
    }

    fn job(kind: ParameterType, batch: i64) -> JobSpecBuilder {
        let b = JobSpecBuilder::new("TEST_JOB")
            .name("test")
            .resource(MethodType::ApiGet, "https://apis.example.com/x")
            .base_parameter("serviceKey", "KEY")
            .schedule(ScheduleType::Daily, 2, 0, None, None);
        match kind {
            ParameterType::Single => b.single(),
            k => b.expanding(k, batch, 3),
        }
    }

    #[tokio::test]
    async fn matrix_firing_plans_all_combinations() {
        let spec = job(ParameterType::Matrix, 4)
            .dimension(list("LAWD_CD", &["11110", "11140", "11170"]))
            .dimension(list("DEAL_YMD", &["202401", "202402"]))
            .build()
            .unwrap();
        let plan = prepare(&spec, &Resolver::new(), Limits::default()).await.unwrap();
        assert_eq!(plan.unit_count(), 6);
        assert_eq!(plan.batches.iter().map(|b| b.units.len()).collect::<Vec<_>>(), [4, 2]);
        assert_eq!(plan.delay_seconds, 3);
        let first = &plan.batches[0].units[0].parameters;
        assert_eq!(first["LAWD_CD"], "11110");
        assert_eq!(first["DEAL_YMD"], "202401");
        assert_eq!(first["serviceKey"], "KEY");
    }

    #[tokio::test]
    async fn multi_param_never_resolves_later_dimensions() {
        let broken = ParameterDraft::new("B", ValueSourceType::FileList, "missing.txt");
        let spec = job(ParameterType::MultiParam, 10)
            .dimension(list("A", &["x", "y"]))
            .dimension(broken)
            .build()
            .unwrap();
        let plan = prepare(&spec, &Resolver::new(), Limits::default()).await.unwrap();
        assert_eq!(plan.unit_count(), 2);
    }

    #[tokio::test]
    async fn inactive_dimensions_are_skipped() {
        let spec = job(ParameterType::MultiParam, 10)
            .dimension(list("OFF", &["0"]).inactive())
            .dimension(list("ON", &["1", "2", "3"]))
            .build()
            .unwrap();
        let plan = prepare(&spec, &Resolver::new(), Limits::default()).await.unwrap();
        assert!(plan.units().all(|u| u.parameters.contains_key("ON") && !u.parameters.contains_key("OFF")));
        assert_eq!(plan.unit_count(), 3);
    }

    #[tokio::test]
    async fn single_fires_once() {
        let spec = job(ParameterType::Single, 0).dimension(list("IGNORED", &["a", "b"])).build().unwrap();
        let plan = prepare(&spec, &Resolver::new(), Limits::default()).await.unwrap();
        assert_eq!(plan.unit_count(), 1);
        assert_eq!(plan.delay_seconds, 0);
        assert!(!plan.batches[0].units[0].parameters.contains_key("IGNORED"));
    }

    #[tokio::test]
    async fn empty_required_dimension_fails_the_firing() {
        let spec = job(ParameterType::Matrix, 10)
            .dimension(list("A", &["x"]))
            .dimension(list("B", &[]))
            .build()
            .unwrap();
        let err = prepare(&spec, &Resolver::new(), Limits::default()).await.unwrap_err();
        assert!(matches!(
            err,
            FiringError::Resolve { ref parameter, source: ResolveError::EmptySource { .. } } if parameter == "B"
        ));
    }

    #[tokio::test]
    async fn ceiling_applies() {
        let many: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        let spec = job(ParameterType::Matrix, 10)
            .dimension(list("A", &many))
            .dimension(list("B", &many))
            .build()
            .unwrap();
        let err = prepare(&spec, &Resolver::new(), Limits { max_units: 1000 }).await.unwrap_err();
        assert!(matches!(err, FiringError::Expansion(ExpansionError::TooLarge { units: 2500, .. })));
    }

    #[tokio::test]
    async fn oversized_date_range_is_refused_before_it_is_built() {
        let centuries = ParameterDraft::new(
            "DAY",
            ValueSourceType::DateRange,
            r#"{"startDate":"1800-01-01","endDate":"2199-12-31","format":"yyyyMMdd","interval":"DAY"}"#,
        );
        let spec = job(ParameterType::MultiParam, 10).dimension(centuries).build().unwrap();
        let err = prepare(&spec, &Resolver::new(), Limits { max_units: 1000 }).await.unwrap_err();
        assert!(matches!(
            err,
            FiringError::Expansion(ExpansionError::TooLarge { units: 146_097, ceiling: 1000 })
        ));
    }

    #[tokio::test]
    async fn outcome_records_failure_without_touching_job() {
        let spec = job(ParameterType::Matrix, 10).dimension(list("A", &[])).build().unwrap();
        let before = spec.clone();
        let res = prepare(&spec, &Resolver::new(), Limits::default()).await;
        let outcome = FiringOutcome::from_result(&spec.job_code, 42, &res);
        assert!(!outcome.succeeded());
        assert_eq!(spec, before);
    }
}
