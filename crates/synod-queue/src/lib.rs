use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use synod_core::{time, ClientId, LogicalError, QueueHandle, SynodError, SynodResult};
use synod_quorum::{majority_succeeded, value_count, ExtendFn, ExtendOutcome, LeaseKeeper, LeaseKeeperHandle, TaskSpawner};
use synod_script::{ScriptArg, ScriptExecutor, ScriptName, SlotOutcome};

/// A distributed priority work queue layered on top of per-item majority
/// locks. `put` inserts an item visible once a majority of servers have it;
/// `get` picks the server-local head-of-queue item most servers agree on,
/// then races to lock it across a majority, bumping its score by a random
/// jitter on loss so a contended item doesn't permanently starve the rest
/// of the queue of attention.
pub struct LockingQueue {
    executor: Arc<dyn ScriptExecutor>,
    client_id: ClientId,
    queue_key: String,
    lock_timeout: Duration,
    polling_interval: Duration,
    quorum: usize,
}

impl LockingQueue {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        client_id: ClientId,
        queue_key: impl Into<String>,
        lock_timeout: Duration,
        polling_interval: Duration,
        quorum: usize,
    ) -> Self {
        Self {
            executor,
            client_id,
            queue_key: queue_key.into(),
            lock_timeout,
            polling_interval,
            quorum,
        }
    }

    fn all_servers(&self) -> Vec<usize> {
        (0..self.executor.server_count()).collect()
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// Inserts `item` at `priority` (lower sorts first, matching Redis
    /// `ZADD` ordering). The returned handle's `insert_time` breaks ties
    /// between same-priority items in submission order.
    pub async fn put(&self, item: &str, priority: i64) -> SynodResult<QueueHandle> {
        let insert_time = time::now_f64();
        let handle = QueueHandle { priority, insert_time, item: item.to_string() };
        let handle_key = handle.to_string();

        let keys = vec![self.queue_key.clone()];
        let args = vec![ScriptArg::Str(handle_key), ScriptArg::Int(priority)];
        let results = self
            .executor
            .run_status(ScriptName::LqPut, &self.all_servers(), &keys, &args)
            .await;

        if majority_succeeded(&results, self.quorum) {
            Ok(handle)
        } else {
            Err(SynodError::NoMajority)
        }
    }

    /// Claims the next available item. Each server proposes its own
    /// head-of-queue item (servers are independent, so they may disagree);
    /// the item proposed by the most servers is the one this call tries to
    /// lock for real. If the final majority lock fails — another client won
    /// the race, or the chosen item had already been completed — any
    /// servers this call soft-locked in the proposal round are unlocked
    /// best-effort and the caller should retry.
    pub async fn get(&self) -> SynodResult<QueueHandle> {
        let (_, propose_expireat) = time::get_expireat(self.lock_timeout);
        let keys = vec![self.queue_key.clone()];
        let args = vec![
            ScriptArg::Str(self.client_id.to_string()),
            ScriptArg::Int(propose_expireat),
        ];
        let proposals = self
            .executor
            .run_status(ScriptName::LqGet, &self.all_servers(), &keys, &args)
            .await;

        let mut votes: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, outcome) in &proposals {
            if let SlotOutcome::Value(handle_key) = outcome {
                votes.entry(handle_key.clone()).or_default().push(*idx);
            }
        }

        if votes.is_empty() {
            if proposals
                .iter()
                .any(|(_, o)| matches!(o, SlotOutcome::Logical(LogicalError::QueueEmpty)))
            {
                return Err(SynodError::Logical(LogicalError::QueueEmpty));
            }
            return Err(SynodError::NoMajority);
        }

        let (winner_key, proposing_servers) = votes
            .into_iter()
            .max_by_key(|(_, servers)| servers.len())
            .expect("votes is non-empty");

        let handle = QueueHandle::parse(&winner_key)?;
        let (_, lock_expireat) = time::get_expireat(self.lock_timeout);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let rand_score = handle.priority as f64 + jitter;

        let lock_keys = vec![winner_key.clone(), self.queue_key.clone()];
        let lock_args = vec![
            ScriptArg::Int(lock_expireat),
            ScriptArg::Float(rand_score),
            ScriptArg::Str(self.client_id.to_string()),
        ];
        let lock_results = self
            .executor
            .run_status(ScriptName::LqLock, &self.all_servers(), &lock_keys, &lock_args)
            .await;

        if lock_results
            .iter()
            .any(|(_, o)| matches!(o, SlotOutcome::Logical(LogicalError::AlreadyCompleted)))
        {
            let outdated: Vec<usize> = lock_results
                .iter()
                .filter(|(_, o)| !matches!(o, SlotOutcome::Logical(LogicalError::AlreadyCompleted)))
                .map(|(idx, _)| *idx)
                .collect();
            warn!(handle = %winner_key, servers = ?outdated, "item already completed elsewhere, spreading terminal marker");
            self.propagate_consume(&winner_key, &outdated).await;
            return Err(SynodError::Logical(LogicalError::AlreadyCompleted));
        }

        if majority_succeeded(&lock_results, self.quorum) {
            debug!(item = %handle.item, "claimed queue item");
            return Ok(handle);
        }

        warn!(handle = %winner_key, "lost race for proposed item, cleaning up soft locks");
        self.cleanup_soft_locks(&winner_key, &proposing_servers).await;
        Err(SynodError::CannotObtainLock(winner_key))
    }

    /// Best-effort: tells servers that didn't already know `handle_key` was
    /// completed to mark it so too, so the terminal state doesn't stay
    /// inconsistent across the cluster after one server discovers it.
    async fn propagate_consume(&self, handle_key: &str, servers: &[usize]) {
        if servers.is_empty() {
            return;
        }
        let keys = vec![handle_key.to_string(), self.queue_key.clone()];
        let args = vec![ScriptArg::Str(self.client_id.to_string())];
        let _ = self.executor.run_status(ScriptName::LqConsume, servers, &keys, &args).await;
    }

    async fn cleanup_soft_locks(&self, handle_key: &str, servers: &[usize]) {
        let keys = vec![handle_key.to_string()];
        let args = vec![ScriptArg::Str(self.client_id.to_string())];
        let _ = self
            .executor
            .run_status(ScriptName::LqUnlock, servers, &keys, &args)
            .await;
    }

    pub async fn extend_lock(&self, handle: &QueueHandle) -> SynodResult<()> {
        let (_, expireat) = time::get_expireat(self.lock_timeout);
        let keys = vec![handle.to_string()];
        let args = vec![
            ScriptArg::Int(expireat),
            ScriptArg::Str(self.client_id.to_string()),
        ];
        let results = self
            .executor
            .run_status(ScriptName::LqExtend, &self.all_servers(), &keys, &args)
            .await;

        if majority_succeeded(&results, self.quorum) {
            Ok(())
        } else {
            Err(SynodError::Logical(LogicalError::AlreadyLocked))
        }
    }

    /// Marks `handle` permanently done. Terminal: once any server records
    /// `completed`, no later `get` may hand the item out again there — the
    /// mark doesn't need a majority to be meaningful, since `get`'s
    /// `already completed` check only needs one server to refuse to
    /// propose the item again. Raises `ConsumeError` only if every server
    /// refused; otherwise returns the fraction of queried servers that
    /// confirmed, as the scripts do not require unanimous confirmation.
    pub async fn consume(&self, handle: &QueueHandle) -> SynodResult<f64> {
        let keys = vec![handle.to_string(), self.queue_key.clone()];
        let args = vec![ScriptArg::Str(self.client_id.to_string())];
        let servers = self.all_servers();
        let results = self
            .executor
            .run_status(ScriptName::LqConsume, &servers, &keys, &args)
            .await;

        let confirmed = value_count(&results);
        if confirmed == 0 {
            Err(SynodError::ConsumeError)
        } else {
            Ok(confirmed as f64 / servers.len() as f64)
        }
    }

    /// Starts a background [`LeaseKeeper`] that re-extends `handle`'s lock
    /// every `polling_interval` until it is lost or `stop()`'d.
    pub fn hold(
        self: &Arc<Self>,
        handle: &QueueHandle,
        spawner: &dyn TaskSpawner,
    ) -> Option<LeaseKeeperHandle> {
        let this = Arc::clone(self);
        let handle_owned = handle.clone();
        let extend_fn: Arc<ExtendFn> = Arc::new(move || {
            let this = Arc::clone(&this);
            let handle = handle_owned.clone();
            Box::pin(async move {
                match this.extend_lock(&handle).await {
                    Ok(()) => ExtendOutcome::Extended,
                    Err(_) => ExtendOutcome::Lost,
                }
            })
        });
        LeaseKeeper::hold(&handle.to_string(), extend_fn, self.polling_interval, spawner)
    }

    /// Conservative (minimum-observed) count of items still pending across
    /// the servers that answered, or `None` if fewer than quorum answered.
    pub async fn size(&self) -> SynodResult<Option<i64>> {
        let keys = vec![self.queue_key.clone()];
        let results = self
            .executor
            .run_int(ScriptName::LqQsize, &self.all_servers(), &keys, &[])
            .await;
        let mut sizes: Vec<i64> = results
            .iter()
            .filter_map(|(_, o)| match o {
                SlotOutcome::Value(v) => Some(*v),
                _ => None,
            })
            .collect();
        if sizes.len() < self.quorum {
            return Ok(None);
        }
        sizes.sort_unstable();
        Ok(sizes.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_quorum::test_support::FakeCluster;

    fn queue(cluster: Arc<FakeCluster>, quorum: usize, client: ClientId) -> LockingQueue {
        LockingQueue::new(
            cluster,
            client,
            "jobs",
            Duration::from_secs(30),
            Duration::from_secs(5),
            quorum,
        )
    }

    #[tokio::test]
    async fn put_then_get_returns_the_item() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q = queue(Arc::clone(&cluster), 2, ClientId::generate());
        q.put("order:1", 10).await.unwrap();
        let handle = q.get().await.unwrap();
        assert_eq!(handle.item, "order:1");
    }

    #[tokio::test]
    async fn get_on_empty_queue_fails() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q = queue(cluster, 2, ClientId::generate());
        assert!(matches!(
            q.get().await.unwrap_err(),
            SynodError::Logical(LogicalError::QueueEmpty)
        ));
    }

    #[tokio::test]
    async fn second_client_cannot_get_same_item_while_locked() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q1 = queue(Arc::clone(&cluster), 2, ClientId::generate());
        let q2 = queue(Arc::clone(&cluster), 2, ClientId::generate());
        q1.put("order:1", 10).await.unwrap();
        let handle = q1.get().await.unwrap();
        assert!(q2.get().await.is_err());
        q1.consume(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn consume_is_terminal() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q1 = queue(Arc::clone(&cluster), 2, ClientId::generate());
        q1.put("order:1", 10).await.unwrap();
        let handle = q1.get().await.unwrap();
        q1.consume(&handle).await.unwrap();

        let q2 = queue(cluster, 2, ClientId::generate());
        assert!(matches!(
            q2.get().await.unwrap_err(),
            SynodError::Logical(LogicalError::QueueEmpty) | SynodError::NoMajority
        ));
    }

    #[tokio::test]
    async fn consume_succeeds_on_any_confirmation_short_of_majority() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q1 = queue(Arc::clone(&cluster), 2, ClientId::generate());
        q1.put("order:1", 10).await.unwrap();
        let handle = q1.get().await.unwrap();

        cluster.set_down(0, true);
        cluster.set_down(1, true);
        let confirmed = q1.consume(&handle).await.unwrap();
        assert!((confirmed - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn consume_fails_only_when_every_server_refuses() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q1 = queue(Arc::clone(&cluster), 2, ClientId::generate());
        let other_client = queue(Arc::clone(&cluster), 2, ClientId::generate());
        q1.put("order:1", 10).await.unwrap();
        let handle = q1.get().await.unwrap();

        assert!(matches!(
            other_client.consume(&handle).await.unwrap_err(),
            SynodError::ConsumeError
        ));
    }

    #[tokio::test]
    async fn get_spreads_completion_to_servers_that_missed_it() {
        let cluster = Arc::new(FakeCluster::new(3));
        let putter = ClientId::generate();
        let q = queue(Arc::clone(&cluster), 2, putter);
        let handle = q.put("order:1", 10).await.unwrap();
        let handle_key = handle.to_string();

        // Server 2 learns the item is done through some other path (e.g. a
        // client that already finished it there) while 0 and 1 still carry
        // the stale in-progress lock.
        let (_, expireat) = time::get_expireat(Duration::from_secs(30));
        cluster
            .run_status(
                ScriptName::LqLock,
                &[2],
                &[handle_key.clone(), "jobs".to_string()],
                &[ScriptArg::Int(expireat), ScriptArg::Float(10.0), ScriptArg::Str(putter.to_string())],
            )
            .await;
        cluster
            .run_status(
                ScriptName::LqConsume,
                &[2],
                &[handle_key.clone(), "jobs".to_string()],
                &[ScriptArg::Str(putter.to_string())],
            )
            .await;

        let racer = ClientId::generate();
        let q2 = queue(Arc::clone(&cluster), 2, racer);
        assert!(matches!(
            q2.get().await.unwrap_err(),
            SynodError::Logical(LogicalError::AlreadyCompleted)
        ));

        // Server 0 held the item under `racer`'s lock until the completion
        // marker spread; a fresh lock attempt there now sees it as done too.
        let retry = cluster
            .run_status(
                ScriptName::LqLock,
                &[0],
                &[handle_key.clone(), "jobs".to_string()],
                &[ScriptArg::Int(expireat), ScriptArg::Float(10.0), ScriptArg::Str(ClientId::generate().to_string())],
            )
            .await;
        assert!(matches!(
            retry.as_slice(),
            [(0, SlotOutcome::Logical(LogicalError::AlreadyCompleted))]
        ));
    }

    #[tokio::test]
    async fn size_reports_pending_items() {
        let cluster = Arc::new(FakeCluster::new(3));
        let q = queue(Arc::clone(&cluster), 2, ClientId::generate());
        q.put("a", 1).await.unwrap();
        q.put("b", 2).await.unwrap();
        assert_eq!(q.size().await.unwrap(), Some(2));
    }
}
