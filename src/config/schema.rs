//! Configuration schema definitions for reroll.
//!
//! All configuration types deserialized from the TOML configuration file.
//! The executor backend is selected with a tagged enum.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RerollConfig     - Core settings (retry budget, fork override)
//! ├── ExecutorConfig   - Tagged enum selecting the executor backend
//! │   └── Process      - One child process per unit
//! └── ReportConfig     - Output and reporting settings
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::policy::{DEFAULT_MAX_FAILURES, DEFAULT_MAX_RETRIES, RetryBudget};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [reroll]
/// max_retries = 1
/// max_failures = 10
///
/// [executor]
/// type = "process"
/// run_command = "scripts/run-suite.sh {unit}"
///
/// [report]
/// output_dir = "test-results"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core retry/parallelism settings.
    #[serde(default)]
    pub reroll: RerollConfig,

    /// Executor configuration determining how units run.
    pub executor: ExecutorConfig,

    /// Report configuration (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_retries` | 1 |
/// | `max_failures` | 10 |
/// | `performance` | false |
/// | `max_forks` | derived from cores / agents |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerollConfig {
    /// Reruns allowed after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Failure-count ceiling; a run failing more units than this is never
    /// retried.
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    /// Mark runs from this config as performance-classified. Retry never
    /// applies to them.
    #[serde(default)]
    pub performance: bool,

    /// Explicit fork-count override. When unset, forks are planned from
    /// host cores and agent count.
    pub max_forks: Option<usize>,
}

impl Default for RerollConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_failures: default_max_failures(),
            performance: false,
            max_forks: None,
        }
    }
}

impl RerollConfig {
    /// The retry budget encoded in this config.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            max_retries: self.max_retries,
            max_failures: self.max_failures,
        }
    }
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_max_failures() -> usize {
    DEFAULT_MAX_FAILURES
}

/// Executor configuration selecting the backend via the `type` field.
///
/// ```toml
/// [executor]
/// type = "process"
/// run_command = "cargo test -p {unit}"
/// shell = "/bin/sh"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutorConfig {
    /// One child process per unit.
    Process(ProcessExecutorConfig),
}

/// Settings for the process executor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessExecutorConfig {
    /// Command template; `{unit}` is replaced with the unit's qualified
    /// name.
    pub run_command: String,

    /// Shell to run the command under. When unset, the command is split
    /// into words and executed directly.
    #[serde(default = "default_shell")]
    pub shell: Option<String>,

    /// Working directory for child processes.
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for child processes.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-unit timeout in seconds. A timed-out unit counts as failed.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_shell() -> Option<String> {
    Some("/bin/sh".to_string())
}

fn default_timeout() -> u64 {
    900 // 15 minutes
}

/// Report output settings.
///
/// ```toml
/// [report]
/// output_dir = "test-results"
/// junit = true
/// junit_file = "junit.xml"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory for generated reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Whether to write a JUnit XML report.
    #[serde(default = "default_junit")]
    pub junit: bool,

    /// JUnit XML file name within `output_dir`.
    #[serde(default = "default_junit_file")]
    pub junit_file: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            junit: default_junit(),
            junit_file: default_junit_file(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_junit() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}
