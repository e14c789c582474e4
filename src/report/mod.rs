//! Run reporting and output generation.

pub mod junit;

use async_trait::async_trait;

use crate::coordinator::AggregateReport;
use crate::executor::{RunAttempt, TestUnit};
use crate::policy::{RetryDecision, RetryReason};

pub use junit::JUnitReporter;

/// A reporter receives progress events from the run coordinator.
///
/// Events are purely observational; reporters never influence retry
/// decisions.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once before the first attempt.
    async fn on_run_start(&self, units: &[TestUnit], max_forks: usize);

    /// Called at the start of each attempt.
    async fn on_attempt_start(&self, number: usize, unit_count: usize);

    /// Called when an attempt has been sealed and judged.
    async fn on_attempt_complete(&self, attempt: &RunAttempt, decision: &RetryDecision);

    /// Called once with the finalized report.
    async fn on_run_complete(&self, report: &AggregateReport);
}

/// A reporter that does nothing (for tests or silent runs).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _units: &[TestUnit], _max_forks: usize) {}
    async fn on_attempt_start(&self, _number: usize, _unit_count: usize) {}
    async fn on_attempt_complete(&self, _attempt: &RunAttempt, _decision: &RetryDecision) {}
    async fn on_run_complete(&self, _report: &AggregateReport) {}
}

/// A reporter that fans events out to multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Create a new multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_run_start(&self, units: &[TestUnit], max_forks: usize) {
        for reporter in &self.reporters {
            reporter.on_run_start(units, max_forks).await;
        }
    }

    async fn on_attempt_start(&self, number: usize, unit_count: usize) {
        for reporter in &self.reporters {
            reporter.on_attempt_start(number, unit_count).await;
        }
    }

    async fn on_attempt_complete(&self, attempt: &RunAttempt, decision: &RetryDecision) {
        for reporter in &self.reporters {
            reporter.on_attempt_complete(attempt, decision).await;
        }
    }

    async fn on_run_complete(&self, report: &AggregateReport) {
        for reporter in &self.reporters {
            reporter.on_run_complete(report).await;
        }
    }
}

/// Console reporter showing attempt progress in the terminal.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, units: &[TestUnit], max_forks: usize) {
        println!("Running {} units with up to {} forks", units.len(), max_forks);

        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_style(
            indicatif::ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        *self.progress.lock().unwrap() = Some(pb);
    }

    async fn on_attempt_start(&self, number: usize, unit_count: usize) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            pb.set_message(format!("attempt {}: running {} units", number + 1, unit_count));
        }
    }

    async fn on_attempt_complete(&self, attempt: &RunAttempt, decision: &RetryDecision) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            let passed = console::style(attempt.passed_count()).green();
            let failed = if attempt.failed.is_empty() {
                console::style(0).green()
            } else {
                console::style(attempt.failed.len()).red()
            };

            pb.println(format!(
                "attempt {}: {} passed, {} failed ({:.1}s) -> {}",
                attempt.number + 1,
                passed,
                failed,
                attempt.duration.as_secs_f64(),
                decision.reason,
            ));

            if self.verbose {
                for unit in &attempt.failed {
                    pb.println(format!("  {} {}", console::style("FAIL").red(), unit));
                }
            }
        }
    }

    async fn on_run_complete(&self, report: &AggregateReport) {
        if let Some(pb) = self.progress.lock().unwrap().take() {
            pb.finish_and_clear();
        }

        println!();
        println!("Run Results:");
        println!("  Units:     {}", report.verdicts.len());
        println!("  Passed:    {}", console::style(report.passed_count()).green());
        println!("  Failed:    {}", console::style(report.failed_count()).red());
        println!("  Attempts:  {}", report.attempts.len());

        if report.stats.recovered_units > 0 {
            println!(
                "  Recovered: {}",
                console::style(report.stats.recovered_units).yellow()
            );
        }

        println!("  Duration:  {:.1}s", report.duration.as_secs_f64());

        if let Some(reason) = report.final_reason {
            if reason == RetryReason::TooManyFailures {
                println!();
                println!(
                    "{}",
                    console::style(
                        "Rerun suppressed: failure count exceeded the ceiling (systemic break?)"
                    )
                    .red()
                );
            }
        }

        if report.success() {
            println!();
            if report.stats.recovered_units > 0 {
                println!(
                    "{}",
                    console::style("All units passed (some recovered on retry).")
                        .yellow()
                        .bold()
                );
            } else {
                println!("{}", console::style("All units passed!").green().bold());
            }
        } else {
            println!();
            println!("{}", console::style("Some units failed.").red().bold());
            println!();
            println!("Failed units:");
            for v in &report.verdicts {
                if !v.passed {
                    println!(
                        "  - {} (failed in {} attempt{})",
                        v.unit,
                        v.attempts,
                        if v.attempts == 1 { "" } else { "s" }
                    );
                }
            }
        }
    }
}
