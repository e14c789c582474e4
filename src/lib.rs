//! reroll: a CI test-retry orchestrator.
//!
//! Given a set of test units to run, reroll executes them through a
//! pluggable executor with bounded parallelism, feeds each attempt's
//! failures into a retry policy, and re-runs approved subsets until a
//! terminal decision is reached.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Environment**: Resolve CI/agent topology once, at startup
//! - **Planner**: Compute fork counts and distribute units across forks
//! - **Policy**: Decide whether and what to rerun after each attempt
//! - **Coordinator**: Drive sequential attempts and build the final report
//! - **Executor**: Run a unit set (process pool by default)
//! - **Report**: Console progress and JUnit XML output
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use reroll::config::load_config;
//! use reroll::coordinator::Coordinator;
//! use reroll::env::CiEnvironment;
//! use reroll::executor::{ProcessExecutor, TestUnit};
//! use reroll::policy::RetryPolicy;
//! use reroll::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("reroll.toml"))?;
//!     let env = CiEnvironment::resolve()?;
//!     let reroll::config::ExecutorConfig::Process(exec_cfg) = config.executor;
//!
//!     let policy = RetryPolicy::for_environment(config.reroll.budget(), &env);
//!     let executor = Arc::new(ProcessExecutor::new(exec_cfg));
//!     let coordinator = Coordinator::new(policy, executor, Arc::new(NullReporter), 4);
//!
//!     let report = coordinator.run(vec![TestUnit::new("billing::InvoiceSuite")]).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod env;
pub mod executor;
pub mod planner;
pub mod policy;
pub mod report;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use coordinator::{AggregateReport, Coordinator, UnitVerdict};
pub use env::CiEnvironment;
pub use executor::{RunAttempt, TestExecutor, TestUnit};
pub use policy::{RetryBudget, RetryDecision, RetryPolicy, RetryReason};
pub use report::Reporter;
