use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use synod_core::{ClientId, LogicalError, SynodError, SynodResult};
use synod_quorum::{majority_succeeded, ExtendFn, ExtendOutcome, LeaseKeeper, LeaseKeeperHandle, TaskSpawner};
use synod_script::{ScriptArg, ScriptExecutor, ScriptName};

/// A distributed mutual-exclusion lock over `N` independent
/// Redis-compatible servers. A call succeeds only once quorum of the
/// declared cluster agrees; the fencing token stored at each server is this
/// client's [`ClientId`], so a server can always tell a stale renewal from
/// the genuine current holder.
pub struct MajorityLock {
    executor: Arc<dyn ScriptExecutor>,
    client_id: ClientId,
    lock_timeout: Duration,
    polling_interval: Duration,
    clock_drift: Duration,
    quorum: usize,
}

impl MajorityLock {
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        client_id: ClientId,
        lock_timeout: Duration,
        polling_interval: Duration,
        clock_drift: Duration,
        quorum: usize,
    ) -> Self {
        Self {
            executor,
            client_id,
            lock_timeout,
            polling_interval,
            clock_drift,
            quorum,
        }
    }

    fn all_servers(&self) -> Vec<usize> {
        (0..self.executor.server_count()).collect()
    }

    /// Best-effort release of `path` on exactly `servers` — used to clean up
    /// the minority of servers a failed acquisition managed to lock, so they
    /// don't sit held until their lease expires on its own.
    async fn release(&self, path: &str, servers: &[usize]) {
        if servers.is_empty() {
            return;
        }
        let keys = vec![path.to_string()];
        let args = vec![ScriptArg::Str(self.client_id.to_string())];
        let _ = self.executor.run_status(ScriptName::LUnlock, servers, &keys, &args).await;
    }

    /// Attempts to acquire `path` once. Re-entrant for the holder: calling
    /// this again with the same `client_id` while still holding the lock
    /// just refreshes the lease rather than failing. On success, returns the
    /// Unix timestamp the lease is valid until.
    pub async fn lock(&self, path: &str) -> SynodResult<i64> {
        let (_, expireat) = synod_core::time::get_expireat(self.lock_timeout);
        let keys = vec![path.to_string()];
        let args = vec![
            ScriptArg::Str(self.client_id.to_string()),
            ScriptArg::Int(expireat),
        ];
        let results = self
            .executor
            .run_status(ScriptName::LLock, &self.all_servers(), &keys, &args)
            .await;

        if !majority_succeeded(&results, self.quorum) {
            let acquired: Vec<usize> = results.iter().filter(|(_, o)| o.is_value()).map(|(idx, _)| *idx).collect();
            self.release(path, &acquired).await;
            return Err(SynodError::CannotObtainLock(path.to_string()));
        }

        if synod_core::time::lock_still_valid(expireat, self.clock_drift, self.polling_interval).is_none() {
            let acquired: Vec<usize> = results.iter().filter(|(_, o)| o.is_value()).map(|(idx, _)| *idx).collect();
            self.release(path, &acquired).await;
            return Err(SynodError::CannotObtainLock(path.to_string()));
        }

        debug!(path, client = %self.client_id, expireat, "lock acquired");
        Ok(expireat)
    }

    pub async fn unlock(&self, path: &str) -> SynodResult<()> {
        let keys = vec![path.to_string()];
        let args = vec![ScriptArg::Str(self.client_id.to_string())];
        let results = self
            .executor
            .run_status(ScriptName::LUnlock, &self.all_servers(), &keys, &args)
            .await;

        if majority_succeeded(&results, self.quorum) {
            info!(path, client = %self.client_id, "lock released");
            Ok(())
        } else {
            Err(SynodError::Logical(LogicalError::AlreadyLocked))
        }
    }

    pub async fn extend_lock(&self, path: &str) -> SynodResult<()> {
        let (_, expireat) = synod_core::time::get_expireat(self.lock_timeout);
        let keys = vec![path.to_string()];
        let args = vec![
            ScriptArg::Int(expireat),
            ScriptArg::Str(self.client_id.to_string()),
        ];
        let results = self
            .executor
            .run_status(ScriptName::LExtend, &self.all_servers(), &keys, &args)
            .await;

        if !majority_succeeded(&results, self.quorum) {
            return Err(SynodError::Logical(LogicalError::AlreadyLocked));
        }
        if synod_core::time::lock_still_valid(expireat, self.clock_drift, self.polling_interval).is_none() {
            return Err(SynodError::Logical(LogicalError::Expired));
        }
        Ok(())
    }

    /// Starts a background [`LeaseKeeper`] that calls `extend_lock(path)`
    /// every `polling_interval` until it is lost or `stop()`'d. Mirrors the
    /// renewal thread the original implementation spins up inside `lock()`
    /// when called with a lease that should outlive one `lock_timeout`.
    pub fn hold(self: &Arc<Self>, path: &str, spawner: &dyn TaskSpawner) -> Option<LeaseKeeperHandle> {
        let this = Arc::clone(self);
        let path_owned = path.to_string();
        let extend_fn: Arc<ExtendFn> = Arc::new(move || {
            let this = Arc::clone(&this);
            let path = path_owned.clone();
            Box::pin(async move {
                match this.extend_lock(&path).await {
                    Ok(()) => ExtendOutcome::Extended,
                    Err(SynodError::Logical(LogicalError::Expired)) => ExtendOutcome::Expired,
                    Err(_) => ExtendOutcome::Lost,
                }
            })
        });
        LeaseKeeper::hold(path, extend_fn, self.polling_interval, spawner)
    }
}
