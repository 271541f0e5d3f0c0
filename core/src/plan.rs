use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Serialize;

use crate::expand::ExecutionUnit;
use crate::job::{JobSpec, MethodType};

/// Units dispatched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Position in the plan, from 0.
    pub index: usize,
    /// Units in expansion order.
    pub units: Vec<ExecutionUnit>,
}

/// What the external executor receives for one firing.
///
/// Owns all of its data, so later edits to the job do not reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Job that produced the plan.
    pub job_code: String,
    /// Access method for every unit.
    pub method_type: MethodType,
    /// Target of every unit.
    pub resource_url: String,
    /// Priority hint, 1..=10.
    pub resource_weight: u8,
    /// Minimum gap between dispatch starts of consecutive batches.
    pub delay_seconds: u32,
    /// Batches in dispatch order.
    pub batches: Vec<Batch>,
}

impl ExecutionPlan {
    /// Inter-batch delay as a duration.
    pub fn delay(&self) -> Duration { Duration::from_secs(u64::from(self.delay_seconds)) }

    /// Total units across all batches.
    pub fn unit_count(&self) -> usize { self.batches.iter().map(|b| b.units.len()).sum() }

    /// All units in dispatch order.
    pub fn units(&self) -> impl Iterator<Item = &ExecutionUnit> {
        self.batches.iter().flat_map(|b| b.units.iter())
    }
}

/// Chunk `units` into batches of at most `batch_size`. The last batch may be short.
pub fn batch(units: Vec<ExecutionUnit>, batch_size: NonZeroUsize) -> Vec<Batch> {
    let size = batch_size.get();
    let mut batches = Vec::with_capacity(units.len().div_ceil(size));
    let mut iter = units.into_iter().peekable();
    while iter.peek().is_some() {
        let units: Vec<ExecutionUnit> = iter.by_ref().take(size).collect();
        batches.push(Batch { index: batches.len(), units });
    }
    batches
}

/// Build the plan for one firing of `job`. SINGLE jobs get one batch and no delay.
pub fn plan(job: &JobSpec, units: Vec<ExecutionUnit>) -> ExecutionPlan {
    let (batch_size, delay_seconds) = match job.strategy.batching() {
        Some(b) => (b.batch_size, b.delay_seconds),
        None => (NonZeroUsize::MIN, 0),
    };
    ExecutionPlan {
        job_code: job.job_code.clone(),
        method_type: job.method_type,
        resource_url: job.resource_url.clone(),
        resource_weight: job.resource_weight,
        delay_seconds,
        batches: batch(units, batch_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn units(n: usize) -> Vec<ExecutionUnit> {
        (0..n).map(|index| ExecutionUnit { index, parameters: BTreeMap::new() }).collect()
    }

    fn size(n: usize) -> NonZeroUsize { NonZeroUsize::new(n).unwrap() }

    #[test]
    fn seven_by_three() {
        let batches = batch(units(7), size(3));
        let sizes: Vec<usize> = batches.iter().map(|b| b.units.len()).collect();
        assert_eq!(sizes, [3, 3, 1]);
        assert_eq!(batches.iter().map(|b| b.index).collect::<Vec<_>>(), [0, 1, 2]);
    }

    #[test]
    fn concatenation_preserves_order_without_duplicates() {
        for (n, s) in [(0, 1), (1, 1), (10, 3), (9, 3), (5, 10)] {
            let batches = batch(units(n), size(s));
            assert_eq!(batches.len(), n.div_ceil(s));
            let flat: Vec<usize> = batches.iter().flat_map(|b| b.units.iter().map(|u| u.index)).collect();
            assert_eq!(flat, (0..n).collect::<Vec<_>>());
            assert!(batches.iter().all(|b| !b.units.is_empty() && b.units.len() <= s));
        }
    }

    #[test]
    fn plan_reports_delay_and_units() {
        let plan = ExecutionPlan {
            job_code: "J".into(),
            method_type: MethodType::ApiGet,
            resource_url: "https://example.com".into(),
            resource_weight: 1,
            delay_seconds: 2,
            batches: batch(units(4), size(3)),
        };
        assert_eq!(plan.delay(), Duration::from_secs(2));
        assert_eq!(plan.unit_count(), 4);
        assert_eq!(plan.units().count(), 4);
    }
}
