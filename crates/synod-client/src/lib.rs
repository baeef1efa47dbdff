use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use synod_core::{exponential_backoff, ClientId, ClusterConfig, RetryPolicy, SynodError, SynodResult};
use synod_lock::MajorityLock;
use synod_queue::LockingQueue;
use synod_register::MajorityRegister;
use synod_script::{JoinAllMapper, ScriptExecutor, ScriptRunner};

/// Top-level entry point: owns the connections to every server in a
/// [`ClusterConfig`] and hands out configured `MajorityLock` /
/// `MajorityRegister` / `LockingQueue` instances that all share one
/// [`ScriptRunner`] and one randomly generated [`ClientId`] for the process.
pub struct SynodClient {
    executor: Arc<dyn ScriptExecutor>,
    client_id: ClientId,
    config: ClusterConfig,
}

impl SynodClient {
    /// Opens a `redis::Client` for every URL in `config.server_urls` (lazy —
    /// no connection is made until the first call) and wraps them in a
    /// shared [`ScriptRunner`] using the default concurrent fan-out.
    pub fn connect(config: ClusterConfig) -> SynodResult<Self> {
        let clients = config
            .server_urls
            .iter()
            .map(|url| {
                redis::Client::open(url.as_str())
                    .map_err(|e| SynodError::Config(format!("invalid server url {url:?}: {e}")))
            })
            .collect::<SynodResult<Vec<_>>>()?;

        let client_id = ClientId::generate();
        info!(client = %client_id, n_servers = config.n_servers, "synod client ready");

        let runner = ScriptRunner::new(clients, Box::new(JoinAllMapper));
        Ok(Self {
            executor: Arc::new(runner),
            client_id,
            config,
        })
    }

    /// Construct directly from an already-built executor. Used by tests and
    /// by callers that want a custom [`synod_script::ParallelMapper`] or a
    /// non-Redis [`ScriptExecutor`].
    pub fn from_executor(executor: Arc<dyn ScriptExecutor>, client_id: ClientId, config: ClusterConfig) -> Self {
        Self { executor, client_id, config }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn lock(&self) -> MajorityLock {
        MajorityLock::new(
            Arc::clone(&self.executor),
            self.client_id,
            self.config.lock_timeout,
            self.config.polling_interval,
            self.config.clock_drift,
            self.config.quorum(),
        )
    }

    pub fn register(&self) -> MajorityRegister {
        MajorityRegister::new(Arc::clone(&self.executor), self.config.quorum())
    }

    pub fn queue(&self, queue_key: impl Into<String>) -> LockingQueue {
        LockingQueue::new(
            Arc::clone(&self.executor),
            self.client_id,
            queue_key,
            self.config.lock_timeout,
            self.config.polling_interval,
            self.config.quorum(),
        )
    }

    /// Acquires `path`, retrying with exponential backoff (starting at the
    /// configured `polling_interval`, capped at `lock_timeout`) until
    /// `nretry` attempts are exhausted or `overall_timeout` elapses.
    /// Mirrors the `blocking=True` mode of the original implementation's
    /// `lock()`, generalized as the shared [`RetryPolicy`] combinator.
    pub async fn lock_blocking(
        &self,
        path: &str,
        nretry: u32,
        overall_timeout: Duration,
    ) -> SynodResult<MajorityLock> {
        let lock = self.lock();
        let policy = RetryPolicy::new(
            nretry,
            overall_timeout,
            exponential_backoff(self.config.polling_interval, self.config.lock_timeout),
        );
        policy.run(|| lock.lock(path), |_: &i64| true).await?;
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synod_quorum::test_support::FakeCluster;

    fn test_config() -> ClusterConfig {
        ClusterConfig::new(
            vec![
                "redis://127.0.0.1:6400".into(),
                "redis://127.0.0.1:6401".into(),
                "redis://127.0.0.1:6402".into(),
            ],
            3,
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn facade_wires_shared_executor_across_primitives() {
        let cluster: Arc<dyn ScriptExecutor> = Arc::new(FakeCluster::new(3));
        let client = SynodClient::from_executor(cluster, ClientId::generate(), test_config());

        client.lock().lock("resource:a").await.unwrap();
        client.register().set("k", "v").await.unwrap();
        let handle = client.queue("jobs").put("item", 1).await.unwrap();
        assert_eq!(handle.item, "item");
    }

    #[tokio::test]
    async fn connect_rejects_malformed_urls() {
        let mut cfg = test_config();
        cfg.server_urls[0] = "not a url".into();
        assert!(SynodClient::connect(cfg).is_err());
    }
}
