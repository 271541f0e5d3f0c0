use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use dsflow_core::plan::{Batch, ExecutionPlan};

/// How far a walk over a plan got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Walk {
    pub batches_sent: usize,
    pub cancelled: bool,
}

/// Hand batches to `emit` in order, keeping at least the plan's delay between
/// the start of consecutive batches. Cancellation is only observed between
/// batches, so a batch is either handed over whole or not at all.
pub async fn walk<F>(plan: &ExecutionPlan, wait: bool, mut shutdown: watch::Receiver<bool>, mut emit: F) -> Result<Walk>
where
    F: FnMut(&Batch) -> Result<()>,
{
    let mut sent = 0;
    for batch in &plan.batches {
        if *shutdown.borrow() {
            warn!(job = %plan.job_code, sent, "dispatch cancelled");
            return Ok(Walk { batches_sent: sent, cancelled: true });
        }
        let started = Instant::now();
        emit(batch)?;
        sent += 1;
        info!(job = %plan.job_code, batch = batch.index, units = batch.units.len(), "batch handed over");

        if !wait || sent == plan.batches.len() {
            continue;
        }
        let deadline = started + plan.delay();
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        warn!(job = %plan.job_code, sent, "dispatch cancelled");
                        return Ok(Walk { batches_sent: sent, cancelled: true });
                    }
                    Ok(()) => {}
                    // Sender gone: nobody can cancel any more.
                    Err(_) => {
                        sleep_until(deadline).await;
                        break;
                    }
                },
            }
        }
    }
    Ok(Walk { batches_sent: sent, cancelled: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsflow_core::expand::ExecutionUnit;
    use dsflow_core::job::MethodType;
    use dsflow_core::plan::batch;
    use std::collections::BTreeMap;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn plan(units: usize, size: usize, delay_seconds: u32) -> ExecutionPlan {
        let units = (0..units).map(|index| ExecutionUnit { index, parameters: BTreeMap::new() }).collect();
        ExecutionPlan {
            job_code: "WALK".into(),
            method_type: MethodType::ApiGet,
            resource_url: "https://example.com".into(),
            resource_weight: 1,
            delay_seconds,
            batches: batch(units, NonZeroUsize::new(size).unwrap()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_batches() {
        let (_tx, rx) = watch::channel(false);
        let p = plan(7, 3, 5);
        let start = Instant::now();
        let mut seen = Vec::new();
        let walk = walk(&p, true, rx, |b| {
            seen.push((b.index, start.elapsed()));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(walk, Walk { batches_sent: 3, cancelled: false });
        assert_eq!(seen.iter().map(|s| s.0).collect::<Vec<_>>(), [0, 1, 2]);
        assert!(seen[1].1 >= Duration::from_secs(5));
        assert!(seen[2].1 >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_at_batch_boundary() {
        let (tx, rx) = watch::channel(false);
        let p = plan(6, 2, 60);
        let mut count = 0;
        let walk = walk(&p, true, rx, |_| {
            count += 1;
            if count == 1 {
                tx.send(true).unwrap();
            }
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(walk, Walk { batches_sent: 1, cancelled: true });
    }
}
