use synod_core::LogicalError;
use synod_script::SlotOutcome;

/// Quorum threshold for a declared cluster size `n`: `floor(n/2) + 1`.
/// Duplicated from `ClusterConfig::quorum` so this module has no dependency
/// on `synod-core::config` beyond the error/outcome types — callers that
/// already hold a `ClusterConfig` should prefer its method instead.
pub fn quorum_for(n: usize) -> usize {
    n / 2 + 1
}

/// Number of per-server results that resolved to an actual value.
pub fn value_count<T>(results: &[(usize, SlotOutcome<T>)]) -> usize {
    results.iter().filter(|(_, o)| o.is_value()).count()
}

/// Whether at least `quorum` of `results` succeeded with a value. This is
/// the core acceptance test behind `lock`, `set`, `get` (on the locking
/// queue) and `consume` — every primitive operation ultimately reduces its
/// per-server outcomes to this one call.
pub fn majority_succeeded<T>(results: &[(usize, SlotOutcome<T>)], quorum: usize) -> bool {
    value_count(results) >= quorum
}

/// True if any server reported `logical` for this call. Used to distinguish
/// "a majority refused because the resource is genuinely locked elsewhere"
/// from "a majority of servers were simply unreachable" — the former should
/// surface as `CannotObtainLock`/`AlreadyCompleted`, the latter as transport
/// noise that a retry might outlive.
pub fn any_logical<T>(results: &[(usize, SlotOutcome<T>)], logical: LogicalError) -> bool {
    results
        .iter()
        .any(|(_, o)| matches!(o, SlotOutcome::Logical(l) if *l == logical))
}

/// Indices of servers whose call failed for a transport reason (as opposed
/// to a logical rejection). Used to log which servers are currently
/// unreachable without treating that as a majority failure by itself.
pub fn transport_failures<T>(results: &[(usize, SlotOutcome<T>)]) -> Vec<usize> {
    results
        .iter()
        .filter_map(|(idx, o)| matches!(o, SlotOutcome::Transport(_)).then_some(*idx))
        .collect()
}

/// Given every server that was queried (`all_servers`) and the subset that
/// answered with a value (`observed`, as `(index, value, timestamp)`),
/// return the indices that need read-repair: any server whose observed
/// value trails the maximum timestamp, *and* any server that didn't make it
/// into `observed` at all — because it returned "never set", a logical
/// error, or a transport failure. A server that missed a write entirely
/// (e.g. it was down and just restarted) looks identical to one holding a
/// stale value from the winner's perspective: both need the winning value
/// pushed to them. Ties are not repaired: a server already holding the
/// winning timestamp is left alone even if another server's value differs
/// (it cannot, since writes are keyed on `(value, ts)` atomically).
pub fn read_repair_targets<T>(all_servers: &[usize], observed: &[(usize, T, i64)]) -> Vec<usize> {
    let Some(latest) = observed.iter().map(|(_, _, ts)| *ts).max() else {
        return Vec::new();
    };
    let lagging: std::collections::HashSet<usize> = observed
        .iter()
        .filter_map(|(idx, _, ts)| (*ts < latest).then_some(*idx))
        .collect();
    let responded: std::collections::HashSet<usize> = observed.iter().map(|(idx, _, _)| *idx).collect();
    all_servers
        .iter()
        .copied()
        .filter(|idx| lagging.contains(idx) || !responded.contains(idx))
        .collect()
}

/// The winning `(value, ts)` pair among observed register reads: the one
/// with the highest timestamp. Ties broken by server index for determinism.
pub fn latest_value<T: Clone>(observed: &[(usize, T, i64)]) -> Option<(T, i64)> {
    observed
        .iter()
        .max_by_key(|(idx, _, ts)| (*ts, *idx))
        .map(|(_, v, ts)| (v.clone(), *ts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(v: Option<i64>) -> SlotOutcome<i64> {
        match v {
            Some(n) => SlotOutcome::Value(n),
            None => SlotOutcome::Logical(LogicalError::AlreadyLocked),
        }
    }

    #[test]
    fn quorum_matches_cluster_config_formula() {
        assert_eq!(quorum_for(1), 1);
        assert_eq!(quorum_for(3), 2);
        assert_eq!(quorum_for(4), 3);
        assert_eq!(quorum_for(5), 3);
    }

    #[test]
    fn majority_requires_threshold_values() {
        let results = vec![
            (0, outcome(Some(1))),
            (1, outcome(Some(1))),
            (2, outcome(None)),
        ];
        assert!(majority_succeeded(&results, 2));
        assert!(!majority_succeeded(&results, 3));
    }

    #[test]
    fn detects_logical_rejection() {
        let results: Vec<(usize, SlotOutcome<i64>)> = vec![
            (0, SlotOutcome::Logical(LogicalError::AlreadyCompleted)),
            (1, SlotOutcome::Value(1)),
        ];
        assert!(any_logical(&results, LogicalError::AlreadyCompleted));
        assert!(!any_logical(&results, LogicalError::QueueEmpty));
    }

    #[test]
    fn read_repair_targets_lag_servers_only() {
        let observed = vec![(0, "a".to_string(), 5), (1, "b".to_string(), 9), (2, "a".to_string(), 9)];
        let mut targets = read_repair_targets(&[0, 1, 2], &observed);
        targets.sort();
        assert_eq!(targets, vec![0]);
        assert_eq!(latest_value(&observed), Some(("b".to_string(), 9)));
    }

    #[test]
    fn read_repair_targets_empty_when_all_agree() {
        let observed = vec![(0, 1, 5), (1, 1, 5)];
        assert!(read_repair_targets(&[0, 1], &observed).is_empty());
    }

    #[test]
    fn read_repair_targets_includes_servers_that_never_answered() {
        let observed = vec![(0, "a".to_string(), 9)];
        let mut targets = read_repair_targets(&[0, 1, 2], &observed);
        targets.sort();
        assert_eq!(targets, vec![1, 2]);
    }
}
