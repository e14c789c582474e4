//! Retry policy engine.
//!
//! The decision core of the orchestrator: given a completed [`RunAttempt`]
//! and a retry budget, decide whether a rerun happens and of exactly which
//! failed units. [`RetryPolicy::decide`] is a pure function of the attempt
//! and the configured budget; per-unit bookkeeping lives in the separate
//! [`UnitTracker`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::env::CiEnvironment;
use crate::executor::{RunAttempt, TestUnit};

/// Default retry count per run.
pub const DEFAULT_MAX_RETRIES: usize = 1;

/// Default failure-count ceiling above which no rerun is attempted.
pub const DEFAULT_MAX_FAILURES: usize = 10;

/// Budget limits for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Maximum reruns after the initial attempt.
    pub max_retries: usize,

    /// Failure-count ceiling per attempt. A run failing more units than
    /// this usually indicates a systemic break rather than flaky tests,
    /// so re-running would waste CI capacity.
    pub max_failures: usize,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

/// Why the policy reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// Every unit passed; nothing to rerun.
    NoFailures,
    /// Retry does not apply: non-CI environment or performance-classified run.
    PolicyNotApplicable,
    /// More failures than the ceiling allows; rerun suppressed.
    TooManyFailures,
    /// The retry budget is spent.
    BudgetExhausted,
    /// A rerun of the failed units was approved.
    RetryApproved,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RetryReason::NoFailures => "no_failures",
            RetryReason::PolicyNotApplicable => "policy_not_applicable",
            RetryReason::TooManyFailures => "too_many_failures",
            RetryReason::BudgetExhausted => "budget_exhausted",
            RetryReason::RetryApproved => "retry_approved",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDecision {
    /// Whether a rerun happens.
    pub proceed: bool,

    /// Units to include in the next attempt. Always a subset of the
    /// evaluated attempt's failures; empty unless `proceed` is true.
    pub units: Vec<TestUnit>,

    /// Named reason for the decision.
    pub reason: RetryReason,
}

impl RetryDecision {
    fn halt(reason: RetryReason) -> Self {
        Self {
            proceed: false,
            units: Vec::new(),
            reason,
        }
    }

    fn approve(units: Vec<TestUnit>) -> Self {
        Self {
            proceed: true,
            units,
            reason: RetryReason::RetryApproved,
        }
    }
}

/// The retry decision procedure.
///
/// Evaluated per run, not per unit: the failure ceiling applies to the whole
/// attempt's failure set, but an approved rerun includes only the failed
/// units.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budget: RetryBudget,
    ci: bool,
    performance_run: bool,
}

impl RetryPolicy {
    /// Create a policy with the given budget for a CI (or not) environment.
    pub fn new(budget: RetryBudget, ci: bool) -> Self {
        Self {
            budget,
            ci,
            performance_run: false,
        }
    }

    /// Build a policy from a resolved environment.
    pub fn for_environment(budget: RetryBudget, env: &CiEnvironment) -> Self {
        Self::new(budget, env.is_ci)
    }

    /// Mark this run as performance-classified. Retry is never applied to
    /// performance runs; a rerun would skew their measurements.
    pub fn performance_run(mut self, performance: bool) -> Self {
        self.performance_run = performance;
        self
    }

    /// The configured budget.
    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Decide whether the attempt that just completed warrants a rerun.
    ///
    /// Pure: no state is read or written beyond the arguments and the
    /// policy's own configuration.
    pub fn decide(&self, attempt: &RunAttempt) -> RetryDecision {
        let decision = if attempt.failed.is_empty() {
            RetryDecision::halt(RetryReason::NoFailures)
        } else if !self.ci || self.performance_run {
            RetryDecision::halt(RetryReason::PolicyNotApplicable)
        } else if attempt.failed.len() > self.budget.max_failures {
            RetryDecision::halt(RetryReason::TooManyFailures)
        } else if attempt.number >= self.budget.max_retries {
            RetryDecision::halt(RetryReason::BudgetExhausted)
        } else {
            RetryDecision::approve(attempt.failed.clone())
        };

        debug!(
            attempt = attempt.number,
            failed = attempt.failed.len(),
            reason = %decision.reason,
            "retry decision"
        );

        decision
    }
}

/// Lifecycle of one unit across the run's retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Not yet executed.
    Pending,
    /// Included in the in-flight attempt.
    Running,
    /// Passed in some attempt; terminal.
    Passed,
    /// Failed the latest attempt, decision pending.
    Failed,
    /// Failed and approved for the next attempt.
    AwaitingRetry,
    /// Failed in every attempt that included it; terminal.
    FinallyFailed,
}

/// Per-unit attempt bookkeeping across the run.
///
/// Tracks the state machine and the attempt/success counters behind
/// flakiness accounting. Shared with reporters, hence the interior lock.
#[derive(Clone, Default)]
pub struct UnitTracker {
    /// Per unit name: (attempts, successes).
    counters: Arc<Mutex<HashMap<String, (usize, usize)>>>,
    states: Arc<Mutex<HashMap<String, UnitState>>>,
}

impl UnitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark units as running at the start of an attempt.
    pub fn begin_attempt(&self, units: &[TestUnit]) {
        let mut states = self.states.lock().unwrap();
        for unit in units {
            states.insert(unit.name.clone(), UnitState::Running);
        }
    }

    /// Fold a sealed attempt and its decision into the per-unit states.
    pub fn record_attempt(&self, attempt: &RunAttempt, decision: &RetryDecision) {
        let mut counters = self.counters.lock().unwrap();
        let mut states = self.states.lock().unwrap();

        let failed: std::collections::HashSet<&str> =
            attempt.failed.iter().map(|u| u.name.as_str()).collect();

        for unit in &attempt.executed {
            let entry = counters.entry(unit.name.clone()).or_insert((0, 0));
            entry.0 += 1;

            let state = if failed.contains(unit.name.as_str()) {
                if decision.proceed {
                    UnitState::AwaitingRetry
                } else {
                    UnitState::FinallyFailed
                }
            } else {
                entry.1 += 1;
                UnitState::Passed
            };
            states.insert(unit.name.clone(), state);
        }
    }

    /// Current state of a unit.
    pub fn state(&self, name: &str) -> UnitState {
        self.states
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(UnitState::Pending)
    }

    /// Number of attempts a unit was included in.
    pub fn attempts(&self, name: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .map(|(a, _)| *a)
            .unwrap_or(0)
    }

    /// Whether a unit recovered: failed at least once, then passed.
    pub fn is_recovered(&self, name: &str) -> bool {
        self.counters
            .lock()
            .unwrap()
            .get(name)
            .map(|(attempts, successes)| *attempts > 1 && *successes > 0 && *successes < *attempts)
            .unwrap_or(false)
    }

    /// Run-level retry statistics.
    pub fn stats(&self) -> RetryStats {
        let counters = self.counters.lock().unwrap();

        let total_units = counters.len();
        let retried_units = counters.values().filter(|(a, _)| *a > 1).count();
        let recovered_units = counters
            .values()
            .filter(|(a, s)| *a > 1 && *s > 0 && *s < *a)
            .count();
        let extra_attempts = counters.values().map(|(a, _)| a.saturating_sub(1)).sum();

        RetryStats {
            total_units,
            retried_units,
            recovered_units,
            extra_attempts,
        }
    }
}

/// Statistics about the retry chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Unique units executed at least once.
    pub total_units: usize,
    /// Units included in more than one attempt.
    pub retried_units: usize,
    /// Units that failed, then passed on a retry.
    pub recovered_units: usize,
    /// Attempt inclusions beyond each unit's first.
    pub extra_attempts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn units(names: &[&str]) -> Vec<TestUnit> {
        names.iter().map(|n| TestUnit::new(*n)).collect()
    }

    fn attempt(number: usize, executed: &[&str], failed: &[&str]) -> RunAttempt {
        RunAttempt {
            number,
            executed: units(executed),
            failed: units(failed),
            duration: Duration::from_secs(1),
            exit_code: if failed.is_empty() { 0 } else { 1 },
            started_at: chrono::Utc::now(),
        }
    }

    fn ci_policy() -> RetryPolicy {
        RetryPolicy::new(RetryBudget::default(), true)
    }

    #[test]
    fn test_no_failures_never_reruns() {
        let decision = ci_policy().decide(&attempt(0, &["a", "b"], &[]));
        assert!(!decision.proceed);
        assert_eq!(decision.reason, RetryReason::NoFailures);
        assert!(decision.units.is_empty());
    }

    #[test]
    fn test_non_ci_never_retries() {
        let policy = RetryPolicy::new(RetryBudget::default(), false);
        let decision = policy.decide(&attempt(0, &["a"], &["a"]));
        assert!(!decision.proceed);
        assert_eq!(decision.reason, RetryReason::PolicyNotApplicable);
    }

    #[test]
    fn test_performance_run_never_retries() {
        let policy = ci_policy().performance_run(true);
        let decision = policy.decide(&attempt(0, &["a"], &["a"]));
        assert_eq!(decision.reason, RetryReason::PolicyNotApplicable);
    }

    #[test]
    fn test_mass_failure_suppresses_retry() {
        let names: Vec<String> = (0..11).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();

        // 11 failures > default ceiling of 10, regardless of budget left.
        let policy = RetryPolicy::new(
            RetryBudget {
                max_retries: 99,
                max_failures: 10,
            },
            true,
        );
        let decision = policy.decide(&attempt(0, &refs, &refs));
        assert!(!decision.proceed);
        assert_eq!(decision.reason, RetryReason::TooManyFailures);
    }

    #[test]
    fn test_failure_count_at_ceiling_still_retries() {
        let names: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();

        let decision = ci_policy().decide(&attempt(0, &refs, &refs));
        assert_eq!(decision.reason, RetryReason::RetryApproved);
    }

    #[test]
    fn test_budget_exhausted_after_max_retries() {
        let policy = ci_policy(); // max_retries = 1

        let first = policy.decide(&attempt(0, &["a"], &["a"]));
        assert_eq!(first.reason, RetryReason::RetryApproved);

        let second = policy.decide(&attempt(1, &["a"], &["a"]));
        assert!(!second.proceed);
        assert_eq!(second.reason, RetryReason::BudgetExhausted);
    }

    #[test]
    fn test_rerun_is_exactly_the_failed_subset() {
        let decision = ci_policy().decide(&attempt(0, &["a", "b", "c"], &["b", "c"]));
        assert!(decision.proceed);
        assert_eq!(decision.units, units(&["b", "c"]));
    }

    #[test]
    fn test_tracker_states_follow_decisions() {
        let policy = ci_policy();
        let tracker = UnitTracker::new();

        assert_eq!(tracker.state("a"), UnitState::Pending);

        let first = attempt(0, &["a", "b"], &["b"]);
        tracker.begin_attempt(&first.executed);
        assert_eq!(tracker.state("b"), UnitState::Running);

        let decision = policy.decide(&first);
        tracker.record_attempt(&first, &decision);
        assert_eq!(tracker.state("a"), UnitState::Passed);
        assert_eq!(tracker.state("b"), UnitState::AwaitingRetry);

        let second = attempt(1, &["b"], &["b"]);
        let decision = policy.decide(&second);
        tracker.record_attempt(&second, &decision);
        assert_eq!(tracker.state("b"), UnitState::FinallyFailed);
        assert_eq!(tracker.attempts("b"), 2);
    }

    #[test]
    fn test_tracker_recovery_accounting() {
        let policy = ci_policy();
        let tracker = UnitTracker::new();

        let first = attempt(0, &["a", "b"], &["b"]);
        tracker.record_attempt(&first, &policy.decide(&first));

        let second = attempt(1, &["b"], &[]);
        tracker.record_attempt(&second, &policy.decide(&second));

        assert!(tracker.is_recovered("b"));
        assert!(!tracker.is_recovered("a"));

        let stats = tracker.stats();
        assert_eq!(stats.total_units, 2);
        assert_eq!(stats.retried_units, 1);
        assert_eq!(stats.recovered_units, 1);
        assert_eq!(stats.extra_attempts, 1);
    }
}
