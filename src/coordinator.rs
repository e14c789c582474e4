//! Run coordination.
//!
//! Drives attempts to completion: executes a unit set, feeds the sealed
//! attempt to the retry policy, and either starts the next attempt with the
//! approved subset or finalizes the aggregate report. Attempts are strictly
//! sequential; the full results of one attempt gate the decision for the
//! next.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::{ExecutorError, RunAttempt, TestExecutor, TestUnit};
use crate::policy::{RetryPolicy, RetryReason, RetryStats, UnitTracker};
use crate::report::Reporter;

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The executor reported an infrastructure failure. The retry loop is
    /// abandoned; remaining attempts are not made.
    #[error("executor aborted the run: {0}")]
    Executor(#[from] ExecutorError),
}

/// Final verdict for one unit.
///
/// A unit passes if it succeeded in any attempt that included it.
#[derive(Debug, Clone)]
pub struct UnitVerdict {
    pub unit: TestUnit,
    pub passed: bool,
    /// Attempts this unit was included in.
    pub attempts: usize,
    /// Failed at least once, then passed on a retry.
    pub recovered: bool,
}

/// Ordered attempt history plus final per-unit verdicts.
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    /// Every attempt, in execution order.
    pub attempts: Vec<RunAttempt>,

    /// Final verdicts, in the original unit order.
    pub verdicts: Vec<UnitVerdict>,

    /// The reason the retry loop stopped.
    pub final_reason: Option<RetryReason>,

    /// Retry-chain statistics.
    pub stats: RetryStats,

    /// Total wall-clock time across all attempts.
    pub duration: Duration,
}

/// Exit code when all units passed but only after retries.
///
/// Lets CI distinguish "green" from "green but flaky".
pub const EXIT_FLAKY: i32 = 34;

impl AggregateReport {
    /// Whether every unit eventually passed.
    pub fn success(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }

    /// Units that eventually passed.
    pub fn passed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.passed).count()
    }

    /// Units whose final verdict is failed.
    pub fn failed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| !v.passed).count()
    }

    /// Process exit status for this run.
    pub fn exit_code(&self) -> i32 {
        if !self.success() {
            1
        } else if self.stats.recovered_units > 0 {
            EXIT_FLAKY
        } else {
            0
        }
    }
}

/// The run coordinator.
///
/// Owns the only mutable handle to the report; attempts are sequential, so
/// report updates never race.
pub struct Coordinator<E, R> {
    policy: RetryPolicy,
    executor: Arc<E>,
    reporter: Arc<R>,
    max_forks: usize,
}

impl<E, R> Coordinator<E, R>
where
    E: TestExecutor + 'static,
    R: Reporter + 'static,
{
    /// Create a coordinator with the given policy, executor, and reporter.
    pub fn new(policy: RetryPolicy, executor: Arc<E>, reporter: Arc<R>, max_forks: usize) -> Self {
        Self {
            policy,
            executor,
            reporter,
            max_forks,
        }
    }

    /// Run the unit set to a terminal decision.
    ///
    /// Ordinary test failures are data fed into the policy; only executor
    /// infrastructure failures surface as errors, and they abort the loop
    /// immediately.
    pub async fn run(&self, units: Vec<TestUnit>) -> CoordinatorResult<AggregateReport> {
        let start = std::time::Instant::now();

        if units.is_empty() {
            warn!("no test units to run");
            return Ok(AggregateReport::default());
        }

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            units = units.len(),
            max_forks = self.max_forks,
            executor = self.executor.name(),
            "starting run"
        );

        self.reporter.on_run_start(&units, self.max_forks).await;

        let tracker = UnitTracker::new();
        let mut attempts: Vec<RunAttempt> = Vec::new();
        let mut final_reason = None;
        let mut current = units.clone();
        let mut number = 0;

        loop {
            self.reporter.on_attempt_start(number, current.len()).await;
            tracker.begin_attempt(&current);

            let attempt = match self
                .executor
                .execute(number, &current, self.max_forks)
                .await
            {
                Ok(attempt) => attempt,
                Err(e) => {
                    error!(%run_id, attempt = number, "aborting run: {}", e);
                    return Err(e.into());
                }
            };

            debug_assert!(is_subset(&attempt.failed, &attempt.executed));

            let decision = self.policy.decide(&attempt);
            tracker.record_attempt(&attempt, &decision);

            info!(
                %run_id,
                attempt = number,
                passed = attempt.passed_count(),
                failed = attempt.failed.len(),
                reason = %decision.reason,
                "attempt complete"
            );

            self.reporter.on_attempt_complete(&attempt, &decision).await;
            attempts.push(attempt);

            if decision.proceed {
                current = decision.units;
                number += 1;
            } else {
                final_reason = Some(decision.reason);
                break;
            }
        }

        let report = finalize(units, attempts, final_reason, &tracker, start.elapsed());
        self.reporter.on_run_complete(&report).await;

        Ok(report)
    }
}

/// Build the final report from the attempt history.
fn finalize(
    units: Vec<TestUnit>,
    attempts: Vec<RunAttempt>,
    final_reason: Option<RetryReason>,
    tracker: &UnitTracker,
    duration: Duration,
) -> AggregateReport {
    let verdicts = units
        .into_iter()
        .map(|unit| {
            let passed = attempts.iter().any(|a| {
                a.executed.contains(&unit) && !a.failed.contains(&unit)
            });
            UnitVerdict {
                passed,
                attempts: tracker.attempts(&unit.name),
                recovered: tracker.is_recovered(&unit.name),
                unit,
            }
        })
        .collect();

    AggregateReport {
        attempts,
        verdicts,
        final_reason,
        stats: tracker.stats(),
        duration,
    }
}

fn is_subset(smaller: &[TestUnit], larger: &[TestUnit]) -> bool {
    let larger: HashSet<&str> = larger.iter().map(|u| u.name.as_str()).collect();
    smaller.iter().all(|u| larger.contains(u.name.as_str()))
}
