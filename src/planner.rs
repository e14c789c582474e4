//! Fork-count planning and unit distribution.
//!
//! This module decides how many test workers run concurrently and
//! distributes units across them for one attempt.

use tracing::debug;

use crate::executor::TestUnit;

/// Compute the maximum number of concurrent test forks.
///
/// An explicit override is used verbatim, clamped to at least 1. Otherwise
/// the host's cores are divided evenly across the agent fleet, rounding
/// down. The result is advisory: it bounds worker count, not a hard OS
/// limit.
pub fn compute_max_forks(total_cores: usize, agent_count: usize, override_forks: Option<usize>) -> usize {
    let forks = match override_forks {
        Some(n) => n.max(1),
        None => (total_cores / agent_count.max(1)).max(1),
    };

    debug!(total_cores, agent_count, forks, "planned fork count");
    forks
}

/// Number of cores available to this process.
pub fn detect_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Distribute units round-robin into at most `forks` batches.
///
/// Each batch runs on one fork; empty batches are dropped so small unit
/// sets do not spawn idle workers.
pub fn distribute(units: &[TestUnit], forks: usize) -> Vec<Vec<TestUnit>> {
    if units.is_empty() {
        return Vec::new();
    }

    let forks = forks.max(1);
    let mut batches: Vec<Vec<TestUnit>> = (0..forks).map(|_| Vec::new()).collect();

    for (i, unit) in units.iter().enumerate() {
        batches[i % forks].push(unit.clone());
    }

    batches.retain(|b| !b.is_empty());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_unit(name: &str) -> TestUnit {
        TestUnit::new(name)
    }

    #[test]
    fn test_override_is_used_verbatim() {
        assert_eq!(compute_max_forks(16, 4, Some(7)), 7);
    }

    #[test]
    fn test_override_clamped_to_one() {
        assert_eq!(compute_max_forks(16, 4, Some(0)), 1);
    }

    #[test]
    fn test_cores_divided_across_agents() {
        assert_eq!(compute_max_forks(16, 4, None), 4);
        assert_eq!(compute_max_forks(17, 4, None), 4); // rounds down
    }

    #[test]
    fn test_more_agents_than_cores() {
        assert_eq!(compute_max_forks(2, 8, None), 1);
    }

    #[test]
    fn test_zero_agent_count_does_not_divide_by_zero() {
        assert_eq!(compute_max_forks(8, 0, None), 8);
    }

    #[test]
    fn test_distribute_empty() {
        assert!(distribute(&[], 4).is_empty());
    }

    #[test]
    fn test_distribute_round_robin() {
        let units: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| make_unit(n)).collect();
        let batches = distribute(&units, 2);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].name, "a");
        assert_eq!(batches[0][1].name, "c");
        assert_eq!(batches[1][0].name, "b");
        assert_eq!(batches[1][1].name, "d");
    }

    #[test]
    fn test_distribute_drops_empty_batches() {
        let units = vec![make_unit("a"), make_unit("b")];
        let batches = distribute(&units, 8);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 1);
    }
}
