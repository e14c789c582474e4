//! Test executor contract and execution data model.
//!
//! The orchestrator core only requires the [`TestExecutor`] contract: run a
//! unit set with a fork bound, come back with a sealed [`RunAttempt`]. The
//! actual execution backend may be a process pool, a remote grid, or an
//! in-process runner.

pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use process::ProcessExecutor;

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors raised by an executor.
///
/// These are infrastructure failures, distinct from ordinary test failures
/// (which are data inside a [`RunAttempt`]). Any executor error aborts the
/// retry loop.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("fatal executor failure: {0}")]
    Fatal(String),

    #[error("worker task panicked: {0}")]
    WorkerPanic(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One test class/suite to execute. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestUnit {
    /// Fully qualified name (e.g. "billing::InvoiceSuite").
    pub name: String,

    /// Originating module, derived from the qualified name.
    pub module: String,
}

impl TestUnit {
    /// Create a unit from a qualified name.
    ///
    /// The module is everything before the last `::` (or `.`) separator;
    /// a bare name lands in the "root" module.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let module = name
            .rfind("::")
            .map(|idx| &name[..idx])
            .or_else(|| name.rfind('.').map(|idx| &name[..idx]))
            .unwrap_or("root")
            .to_string();
        Self { name, module }
    }

    /// Override the originating module.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Short name without the module prefix.
    pub fn short_name(&self) -> &str {
        self.name
            .rsplit("::")
            .next()
            .and_then(|tail| tail.rsplit('.').next())
            .unwrap_or(&self.name)
    }
}

impl std::fmt::Display for TestUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// One sealed execution pass over a unit set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAttempt {
    /// Attempt number; 0 is the initial run.
    pub number: usize,

    /// Units included in this attempt.
    pub executed: Vec<TestUnit>,

    /// Units that failed in this attempt.
    pub failed: Vec<TestUnit>,

    /// Wall-clock duration of the attempt.
    pub duration: std::time::Duration,

    /// Aggregate exit status: 0 when every unit passed.
    pub exit_code: i32,

    /// When the attempt started.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RunAttempt {
    /// Units that passed in this attempt.
    pub fn passed_count(&self) -> usize {
        self.executed.len() - self.failed.len()
    }

    /// Whether every unit in this attempt passed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Executes one attempt over a unit set.
///
/// Implementations must include every failed unit in `failed` and every
/// given unit in `executed`; fatal infrastructure problems (a worker that
/// cannot start, a grid that disappears) are surfaced as [`ExecutorError`],
/// never encoded as test failures.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run `units` with at most `max_forks` concurrent workers.
    async fn execute(
        &self,
        attempt_number: usize,
        units: &[TestUnit],
        max_forks: usize,
    ) -> ExecutorResult<RunAttempt>;

    /// Executor name (for logging and config).
    fn name(&self) -> &'static str;
}

/// A type-erased executor for dynamic dispatch.
pub type DynExecutor = Box<dyn TestExecutor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_module_from_double_colon() {
        let unit = TestUnit::new("billing::invoice::InvoiceSuite");
        assert_eq!(unit.module, "billing::invoice");
        assert_eq!(unit.short_name(), "InvoiceSuite");
    }

    #[test]
    fn test_unit_module_from_dots() {
        let unit = TestUnit::new("com.acme.BillingTest");
        assert_eq!(unit.module, "com.acme");
        assert_eq!(unit.short_name(), "BillingTest");
    }

    #[test]
    fn test_unit_bare_name() {
        let unit = TestUnit::new("SmokeTest");
        assert_eq!(unit.module, "root");
        assert_eq!(unit.short_name(), "SmokeTest");
    }

    #[test]
    fn test_attempt_counts() {
        let a = TestUnit::new("a");
        let b = TestUnit::new("b");
        let attempt = RunAttempt {
            number: 0,
            executed: vec![a, b.clone()],
            failed: vec![b],
            duration: std::time::Duration::from_secs(1),
            exit_code: 1,
            started_at: chrono::Utc::now(),
        };

        assert_eq!(attempt.passed_count(), 1);
        assert!(!attempt.is_clean());
    }
}
