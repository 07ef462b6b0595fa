//! Per-cluster batch execution with failure isolation.
//!
//! Every pipeline stage after segmentation processes a few hundred
//! independent clusters. [`run_batch`] evaluates them on the rayon pool and
//! collects one outcome per cluster, so a failure on one hold is logged and
//! reported without stopping the rest.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{HoldError, HoldResult};
use crate::tracing_ext::OperationTimer;

/// A cluster that failed in a stage.
#[derive(Debug)]
pub struct BatchFailure {
    pub name: String,
    pub error: HoldError,
}

/// Outcome of one stage over a batch of named items.
///
/// Successes and failures each keep the input order.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub stage: String,
    pub successes: Vec<(String, T)>,
    pub failures: Vec<BatchFailure>,
}

impl<T> BatchReport<T> {
    /// Number of items processed.
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// Whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Look up the output for `name`.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.successes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Serializable digest of this report.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            stage: self.stage.clone(),
            total: self.total(),
            succeeded: self.successes.len(),
            failed: self.failures.len(),
            failures: self
                .failures
                .iter()
                .map(|f| FailureRecord {
                    name: f.name.clone(),
                    code: f.error.code().as_str().to_string(),
                    message: f.error.to_string(),
                })
                .collect(),
        }
    }

    /// Drop the failures and keep the successful outputs.
    pub fn into_successes(self) -> Vec<(String, T)> {
        self.successes
    }
}

/// Serializable per-stage summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub stage: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailureRecord>,
}

/// One failed item in a [`BatchSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub name: String,
    pub code: String,
    pub message: String,
}

/// Run `f` over every named item in parallel and collect the outcomes.
///
/// The closure receives the item name for logging and runs inside a
/// per-cluster timing span. Failures are logged at warn level with the item
/// name and error code.
pub fn run_batch<I, T, F>(stage: &'static str, items: Vec<(String, I)>, f: F) -> BatchReport<T>
where
    I: Send,
    T: Send,
    F: Fn(&str, I) -> HoldResult<T> + Sync + Send,
{
    let outcomes: Vec<(String, HoldResult<T>)> = items
        .into_par_iter()
        .map(|(name, item)| {
            let timer = OperationTimer::for_cluster(stage, &name);
            let result = timer.span().in_scope(|| f(&name, item));
            (name, result)
        })
        .collect();

    let mut report = BatchReport {
        stage: stage.to_string(),
        successes: Vec::with_capacity(outcomes.len()),
        failures: Vec::new(),
    };
    for (name, outcome) in outcomes {
        match outcome {
            Ok(value) => {
                debug!(stage, cluster = %name, "Cluster processed");
                report.successes.push((name, value));
            }
            Err(error) => {
                warn!(
                    stage,
                    cluster = %name,
                    code = error.code().as_str(),
                    "Cluster failed: {}",
                    error
                );
                report.failures.push(BatchFailure { name, error });
            }
        }
    }

    info!(
        stage,
        succeeded = report.successes.len(),
        failed = report.failures.len(),
        "Stage complete"
    );
    report
}

/// Run `op` on a dedicated pool of `threads` workers, or on the global
/// pool when `threads` is None.
///
/// # Errors
/// Returns `InvalidParameter` if the pool cannot be built.
pub fn in_pool<R, F>(threads: Option<usize>, op: F) -> HoldResult<R>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match threads {
        None => Ok(op()),
        Some(0) => Err(HoldError::invalid_parameter(
            "threads",
            "worker count must be at least 1",
        )),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| HoldError::invalid_parameter("threads", e.to_string()))?;
            Ok(pool.install(op))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<(String, usize)> {
        (0..n).map(|i| (format!("C{i}"), i)).collect()
    }

    #[test]
    fn test_failures_are_isolated_and_ordered() {
        let report = run_batch("test", items(10), |_, i| {
            if i % 3 == 0 {
                Err(HoldError::reconstruction_failed(format!("item {i}")))
            } else {
                Ok(i * 2)
            }
        });
        assert_eq!(report.total(), 10);
        assert_eq!(report.failures.len(), 4);
        let names: Vec<&str> = report.successes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["C1", "C2", "C4", "C5", "C7", "C8"]);
        assert_eq!(report.get("C5"), Some(&10));
        assert!(!report.is_complete());
    }

    #[test]
    fn test_summary_records_codes() {
        let report = run_batch("clip", items(2), |_, i| {
            if i == 1 {
                Err(HoldError::geometry("convex hull", "collinear"))
            } else {
                Ok(())
            }
        });
        let summary = report.summary();
        assert_eq!(summary.stage, "clip");
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failures[0].name, "C1");
        assert_eq!(summary.failures[0].code, "HOLD-2003");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"failed\":1"));
    }

    #[test]
    fn test_in_pool() {
        let n = in_pool(Some(2), rayon::current_num_threads).unwrap();
        assert_eq!(n, 2);
        assert!(in_pool(Some(0), || ()).is_err());
        assert_eq!(in_pool(None, || 7).unwrap(), 7);
    }
}
