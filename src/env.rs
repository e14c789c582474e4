//! CI environment resolution.
//!
//! Agent topology and mirror overrides are read from the process environment
//! exactly once, at startup, into an immutable [`CiEnvironment`] that is
//! threaded explicitly through the rest of the system. Nothing else in the
//! crate reads environment variables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Variable marking a CI run. Falls back to the conventional `CI` variable.
pub const ENV_CI: &str = "REROLL_CI";

/// Conventional CI flag set by most build servers.
pub const ENV_CI_FALLBACK: &str = "CI";

/// Number of agents sharding the overall suite.
pub const ENV_AGENT_COUNT: &str = "REROLL_AGENT_COUNT";

/// 0-based index of this agent within the fleet.
pub const ENV_AGENT_INDEX: &str = "REROLL_AGENT_INDEX";

/// Comma-separated `id:url` mirror overrides.
pub const ENV_MIRRORS: &str = "REROLL_MIRRORS";

/// Result type for environment resolution.
pub type EnvResult<T> = Result<T, EnvError>;

/// Errors raised when a topology variable is present but malformed.
///
/// Absent variables are never an error; they yield defaults.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidAgentCount { var: &'static str, value: String },

    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidAgentIndex { var: &'static str, value: String },

    #[error("agent index {index} is out of range for {count} agents")]
    AgentIndexOutOfRange { index: usize, count: usize },

    #[error("mirror entry '{entry}' is missing the 'id:url' delimiter")]
    MirrorSpec { entry: String },
}

/// Resolved CI/agent topology.
///
/// Read once via [`CiEnvironment::resolve`] and immutable for the process
/// lifetime; safe to share across concurrent test executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiEnvironment {
    /// Whether this process is running on a CI server.
    pub is_ci: bool,

    /// Number of agents sharding the suite (>= 1).
    pub agent_count: usize,

    /// 0-based index of this agent.
    pub agent_index: usize,

    /// Repository-id to URL mirror overrides.
    pub mirrors: BTreeMap<String, String>,
}

impl Default for CiEnvironment {
    fn default() -> Self {
        Self {
            is_ci: false,
            agent_count: 1,
            agent_index: 0,
            mirrors: BTreeMap::new(),
        }
    }
}

impl CiEnvironment {
    /// Resolve the environment from process variables.
    pub fn resolve() -> EnvResult<Self> {
        Self::resolve_from(|var| std::env::var(var).ok())
    }

    /// Resolve from an arbitrary variable source.
    ///
    /// The indirection keeps resolution testable without mutating the
    /// process environment under a multi-threaded test harness.
    pub fn resolve_from<F>(get: F) -> EnvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_ci = get(ENV_CI)
            .or_else(|| get(ENV_CI_FALLBACK))
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        let agent_count = match get(ENV_AGENT_COUNT) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(EnvError::InvalidAgentCount {
                        var: ENV_AGENT_COUNT,
                        value: raw,
                    });
                }
            },
            None => 1,
        };

        let agent_index = match get(ENV_AGENT_INDEX) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                EnvError::InvalidAgentIndex {
                    var: ENV_AGENT_INDEX,
                    value: raw,
                }
            })?,
            None => 0,
        };

        if agent_index >= agent_count {
            return Err(EnvError::AgentIndexOutOfRange {
                index: agent_index,
                count: agent_count,
            });
        }

        let mirrors = match get(ENV_MIRRORS) {
            Some(raw) => parse_mirror_spec(&raw)?,
            None => BTreeMap::new(),
        };

        let env = Self {
            is_ci,
            agent_count,
            agent_index,
            mirrors,
        };

        debug!(
            is_ci = env.is_ci,
            agent_count = env.agent_count,
            agent_index = env.agent_index,
            mirrors = env.mirrors.len(),
            "resolved CI environment"
        );

        Ok(env)
    }

    /// Mirror overrides as `mirror.<id>.url` property pairs.
    ///
    /// These are injected into executor child processes so a downstream
    /// configuration loader can pick them up.
    pub fn mirror_properties(&self) -> Vec<(String, String)> {
        self.mirrors
            .iter()
            .map(|(id, url)| (format!("mirror.{}.url", id), url.clone()))
            .collect()
    }
}

/// Parse a comma-separated `id:url` mirror spec.
///
/// Each entry is split on the first colon only, since URLs contain colons
/// themselves. Duplicate ids: last occurrence wins.
pub fn parse_mirror_spec(spec: &str) -> EnvResult<BTreeMap<String, String>> {
    let mut mirrors = BTreeMap::new();

    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (id, url) = entry.split_once(':').ok_or_else(|| EnvError::MirrorSpec {
            entry: entry.to_string(),
        })?;

        mirrors.insert(id.trim().to_string(), url.trim().to_string());
    }

    Ok(mirrors)
}

/// Serialize a mirror map back to the `id:url,id:url` wire form.
pub fn format_mirror_spec(mirrors: &BTreeMap<String, String>) -> String {
    mirrors
        .iter()
        .map(|(id, url)| format!("{}:{}", id, url))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
