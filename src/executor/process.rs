//! Local process executor.
//!
//! Runs each test unit as a child process, one command per unit, with the
//! attempt's units distributed round-robin across the planned fork count.
//! This is the default backend; remote grids plug in behind the same
//! [`TestExecutor`](super::TestExecutor) contract.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::{ExecutorError, ExecutorResult, RunAttempt, TestExecutor, TestUnit};
use crate::config::ProcessExecutorConfig;
use crate::planner;

/// Placeholder substituted with the unit's qualified name in `run_command`.
pub const UNIT_PLACEHOLDER: &str = "{unit}";

/// Executor that shells out one command per unit.
#[derive(Clone)]
pub struct ProcessExecutor {
    config: ProcessExecutorConfig,
    properties: Vec<(String, String)>,
}

impl ProcessExecutor {
    /// Create a new process executor with the given configuration.
    pub fn new(config: ProcessExecutorConfig) -> Self {
        Self {
            config,
            properties: Vec::new(),
        }
    }

    /// Inject key-value properties into every child's environment.
    ///
    /// Used for the mirror URL overrides surfaced by the environment
    /// resolver.
    pub fn with_properties(mut self, properties: Vec<(String, String)>) -> Self {
        self.properties = properties;
        self
    }

    /// Run one unit to completion. `Ok(true)` means the unit passed.
    async fn run_unit(&self, unit: &TestUnit) -> ExecutorResult<bool> {
        let command_line = self.config.run_command.replace(UNIT_PLACEHOLDER, &unit.name);

        let mut command = match &self.config.shell {
            Some(shell) => {
                let mut c = tokio::process::Command::new(shell);
                c.arg("-c").arg(&command_line);
                c
            }
            None => {
                let words = shell_words::split(&command_line).map_err(|e| {
                    ExecutorError::Fatal(format!("unparseable run command '{}': {}", command_line, e))
                })?;
                let (program, args) = words.split_first().ok_or_else(|| {
                    ExecutorError::Fatal("run command is empty".to_string())
                })?;
                let mut c = tokio::process::Command::new(program);
                c.args(args);
                c
            }
        };

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        for (key, value) in &self.properties {
            command.env(key, value);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!(unit = %unit, command = %command_line, "running unit");

        let timeout = std::time::Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                // The worker itself cannot start; this is infrastructure,
                // not a test failure.
                return Err(ExecutorError::Fatal(format!(
                    "failed to spawn worker for {}: {}",
                    unit, e
                )));
            }
            Err(_) => {
                warn!(unit = %unit, timeout_secs = self.config.timeout_secs, "unit timed out");
                return Ok(false);
            }
        };

        let passed = output.status.success();
        if !passed {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                unit = %unit,
                exit = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim_end(),
                "unit failed"
            );
        }

        Ok(passed)
    }
}

#[async_trait]
impl TestExecutor for ProcessExecutor {
    async fn execute(
        &self,
        attempt_number: usize,
        units: &[TestUnit],
        max_forks: usize,
    ) -> ExecutorResult<RunAttempt> {
        let start = Instant::now();
        let started_at = chrono::Utc::now();

        let batches = planner::distribute(units, max_forks);
        debug!(
            attempt = attempt_number,
            units = units.len(),
            forks = batches.len(),
            "executing attempt"
        );

        let mut handles = Vec::with_capacity(batches.len());
        for batch in batches {
            let executor = self.clone();
            handles.push(tokio::spawn(async move {
                let mut failed = Vec::new();
                for unit in &batch {
                    if !executor.run_unit(unit).await? {
                        failed.push(unit.clone());
                    }
                }
                Ok::<_, ExecutorError>(failed)
            }));
        }

        let mut failed = Vec::new();
        for outcome in join_all(handles).await {
            let batch_failed = outcome.map_err(|e| ExecutorError::WorkerPanic(e.to_string()))??;
            failed.extend(batch_failed);
        }

        let exit_code = if failed.is_empty() { 0 } else { 1 };

        Ok(RunAttempt {
            number: attempt_number,
            executed: units.to_vec(),
            failed,
            duration: start.elapsed(),
            exit_code,
            started_at,
        })
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(run_command: &str) -> ProcessExecutorConfig {
        ProcessExecutorConfig {
            run_command: run_command.to_string(),
            shell: Some("/bin/sh".to_string()),
            working_dir: None,
            env: Default::default(),
            timeout_secs: 30,
        }
    }

    fn units(names: &[&str]) -> Vec<TestUnit> {
        names.iter().map(|n| TestUnit::new(*n)).collect()
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_failures() {
        // Unit names double as exit codes.
        let executor = ProcessExecutor::new(config("exit {unit}"));
        let units = units(&["0", "1", "0"]);

        let attempt = executor.execute(0, &units, 2).await.unwrap();

        assert_eq!(attempt.executed.len(), 3);
        assert_eq!(attempt.failed, vec![TestUnit::new("1")]);
        assert_eq!(attempt.exit_code, 1);
        assert_eq!(attempt.number, 0);
    }

    #[tokio::test]
    async fn test_clean_attempt() {
        let executor = ProcessExecutor::new(config("true"));
        let attempt = executor.execute(0, &units(&["a", "b"]), 4).await.unwrap();

        assert!(attempt.is_clean());
        assert_eq!(attempt.exit_code, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let mut cfg = config("{unit}");
        cfg.shell = None;
        cfg.run_command = "/nonexistent/reroll-worker {unit}".to_string();

        let executor = ProcessExecutor::new(cfg);
        let result = executor.execute(0, &units(&["a"]), 1).await;

        assert!(matches!(result, Err(ExecutorError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure_not_fatal() {
        let mut cfg = config("sleep 5");
        cfg.timeout_secs = 1;

        let executor = ProcessExecutor::new(cfg);
        let attempt = executor.execute(0, &units(&["slow"]), 1).await.unwrap();

        assert_eq!(attempt.failed, units(&["slow"]));
    }

    #[tokio::test]
    async fn test_properties_injected_into_child_env() {
        let executor = ProcessExecutor::new(config("printenv 'mirror.central.url'"))
            .with_properties(vec![(
                "mirror.central.url".to_string(),
                "https://cache.example.com".to_string(),
            )]);

        let attempt = executor.execute(0, &units(&["probe"]), 1).await.unwrap();
        assert!(attempt.is_clean());
    }

    #[tokio::test]
    async fn test_direct_exec_without_shell() {
        let mut cfg = config("");
        cfg.shell = None;
        cfg.run_command = "true".to_string();

        let executor = ProcessExecutor::new(cfg);
        let attempt = executor.execute(0, &units(&["a"]), 1).await.unwrap();
        assert!(attempt.is_clean());
    }
}
