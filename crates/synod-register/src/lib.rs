use std::sync::Arc;

use tracing::debug;

use synod_core::{LogicalError, SynodError, SynodResult};
use synod_quorum::{latest_value, read_repair_targets};
use synod_script::{ScriptArg, ScriptExecutor, ScriptName, SlotOutcome};

/// A last-writer-wins register replicated (not coordinated) across `N`
/// independent servers. Reads reconcile disagreement by timestamp and
/// opportunistically repair servers that lag the winner; writes are
/// accepted by each server independently and only count if a majority
/// accept the same write.
pub struct MajorityRegister {
    executor: Arc<dyn ScriptExecutor>,
    quorum: usize,
}

impl MajorityRegister {
    pub fn new(executor: Arc<dyn ScriptExecutor>, quorum: usize) -> Self {
        Self { executor, quorum }
    }

    fn all_servers(&self) -> Vec<usize> {
        (0..self.executor.server_count()).collect()
    }

    /// Reads `path`, reconciling disagreement by highest write timestamp.
    /// Returns `Ok(None)` only when a majority of servers agree the key has
    /// never been set; returns `NoMajority` when neither a value nor an
    /// absence reaches quorum (e.g. the cluster is badly partitioned).
    pub async fn get(&self, path: &str) -> SynodResult<Option<String>> {
        let keys = vec![path.to_string()];
        let results = self
            .executor
            .run_register_read(ScriptName::GsGet, &self.all_servers(), &keys, &[])
            .await;

        let observed: Vec<(usize, String, i64)> = results
            .iter()
            .filter_map(|(idx, o)| match o {
                SlotOutcome::Value(Some((v, ts))) => Some((*idx, v.clone(), *ts)),
                _ => None,
            })
            .collect();
        let missing_count = results
            .iter()
            .filter(|(_, o)| matches!(o, SlotOutcome::Value(None)))
            .count();

        if observed.len() >= self.quorum {
            let targets = read_repair_targets(&self.all_servers(), &observed);
            let winner = latest_value(&observed).expect("non-empty observed has a max");
            if !targets.is_empty() {
                debug!(path, targets = ?targets, "read-repairing lagging servers");
                self.repair(path, &winner.0, winner.1, &targets).await;
            }
            return Ok(Some(winner.0));
        }
        if missing_count >= self.quorum {
            return Ok(None);
        }
        Err(SynodError::NoMajority)
    }

    async fn repair(&self, path: &str, value: &str, ts: i64, targets: &[usize]) {
        let keys = vec![path.to_string()];
        let args = vec![ScriptArg::Str(value.to_string()), ScriptArg::Int(ts)];
        let _ = self
            .executor
            .run_status(ScriptName::GsSet, targets, &keys, &args)
            .await;
    }

    /// Writes `value` with the current timestamp. Succeeds once a majority
    /// of servers accept it as the newest write they have seen for `path`.
    pub async fn set(&self, path: &str, value: &str) -> SynodResult<()> {
        let ts = synod_core::time::now_secs();
        let keys = vec![path.to_string()];
        let args = vec![ScriptArg::Str(value.to_string()), ScriptArg::Int(ts)];
        let results = self
            .executor
            .run_status(ScriptName::GsSet, &self.all_servers(), &keys, &args)
            .await;

        let accepted = results.iter().filter(|(_, o)| o.is_value()).count();
        if accepted >= self.quorum {
            return Ok(());
        }
        let stale = results
            .iter()
            .filter(|(_, o)| matches!(o, SlotOutcome::Logical(LogicalError::StaleWrite)))
            .count();
        if stale >= self.quorum {
            return Err(SynodError::Logical(LogicalError::StaleWrite));
        }
        Err(SynodError::NoMajority)
    }

    /// Whether a majority of servers have a value stored for `path`.
    pub async fn exists(&self, path: &str) -> SynodResult<bool> {
        let keys = vec![path.to_string()];
        let results = self
            .executor
            .run_int(ScriptName::GsExists, &self.all_servers(), &keys, &[])
            .await;
        let present = results
            .iter()
            .filter(|(_, o)| matches!(o, SlotOutcome::Value(1)))
            .count();
        Ok(present >= self.quorum)
    }

    /// Milliseconds remaining before `path` expires on the majority of
    /// servers that still have it, or `None` if it has no expiry / doesn't
    /// exist on a majority. Conservative: returns the minimum TTL observed
    /// among the responding quorum, never the maximum.
    pub async fn ttl(&self, path: &str) -> SynodResult<Option<i64>> {
        let keys = vec![path.to_string()];
        let results = self
            .executor
            .run_int(ScriptName::GsTtl, &self.all_servers(), &keys, &[])
            .await;
        let mut positive: Vec<i64> = results
            .iter()
            .filter_map(|(_, o)| match o {
                SlotOutcome::Value(v) if *v >= 0 => Some(*v),
                _ => None,
            })
            .collect();
        if positive.len() < self.quorum {
            return Ok(None);
        }
        positive.sort_unstable();
        Ok(positive.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_quorum::test_support::FakeCluster;

    fn register(cluster: Arc<FakeCluster>, quorum: usize) -> MajorityRegister {
        MajorityRegister::new(cluster, quorum)
    }

    #[tokio::test]
    async fn get_before_any_set_reports_absent() {
        let cluster = Arc::new(FakeCluster::new(3));
        let reg = register(cluster, 2);
        assert_eq!(reg.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cluster = Arc::new(FakeCluster::new(3));
        let reg = register(cluster, 2);
        reg.set("k", "v1").await.unwrap();
        assert_eq!(reg.get("k").await.unwrap(), Some("v1".to_string()));
    }

    #[tokio::test]
    async fn later_write_wins_over_earlier_one() {
        let cluster = Arc::new(FakeCluster::new(3));
        let reg = register(Arc::clone(&cluster), 2);
        reg.set("k", "v1").await.unwrap();
        reg.set("k", "v2").await.unwrap();
        assert_eq!(reg.get("k").await.unwrap(), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn exists_reflects_majority_state() {
        let cluster = Arc::new(FakeCluster::new(3));
        let reg = register(Arc::clone(&cluster), 2);
        assert!(!reg.exists("k").await.unwrap());
        reg.set("k", "v1").await.unwrap();
        assert!(reg.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn get_fails_without_majority_when_partitioned() {
        let cluster = Arc::new(FakeCluster::new(3));
        cluster.set_down(0, true);
        cluster.set_down(1, true);
        let reg = register(cluster, 2);
        assert!(reg.get("k").await.is_err());
    }

    #[tokio::test]
    async fn get_repairs_a_server_that_missed_the_write() {
        let cluster = Arc::new(FakeCluster::new(3));
        let reg = register(Arc::clone(&cluster), 2);

        cluster.set_down(2, true);
        reg.set("k", "v1").await.unwrap();
        cluster.set_down(2, false);

        assert_eq!(reg.get("k").await.unwrap(), Some("v1".to_string()));

        cluster.set_down(0, true);
        cluster.set_down(1, true);
        let solo = register(cluster, 1);
        assert_eq!(solo.get("k").await.unwrap(), Some("v1".to_string()));
    }
}
