use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// Outcome of one lease-extension attempt, as reported by the primitive
/// that owns the lease (a `MajorityLock` or a `LockingQueue` handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    /// Quorum re-affirmed the lease; keep renewing.
    Extended,
    /// The lease has already expired server-side; stop renewing.
    Expired,
    /// Another client now holds the resource; stop renewing.
    Lost,
}

pub type ExtendFuture = Pin<Box<dyn Future<Output = ExtendOutcome> + Send>>;
pub type ExtendFn = dyn Fn() -> ExtendFuture + Send + Sync;

/// Runs a background task. Formalizes the `Timer` dependency the original
/// implementation injects into its lock/queue constructors, so tests can
/// supply a spawner that runs the renewal loop to completion synchronously
/// instead of leaving it running on a real executor.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Default spawner: hands the future to the ambient Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::spawn(fut);
    }
}

/// Process-wide registry of active keepers, keyed on the lease's resource
/// key plus the identity of the extend closure. Two `hold()` calls for the
/// same resource with genuinely distinct closures are both allowed to run
/// (they renew different leases the caller happens to describe with the
/// same string key); calling `hold()` twice with the *same* `Arc`-wrapped
/// closure is a caller bug and the second call is a no-op instead of
/// starting a duplicate renewal loop that would race the first.
static ACTIVE_KEEPERS: Lazy<Mutex<HashSet<(String, usize)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

fn dedup_key(resource: &str, extend_fn: &Arc<ExtendFn>) -> (String, usize) {
    (resource.to_string(), Arc::as_ptr(extend_fn) as *const () as usize)
}

/// Handle to a running lease-renewal loop. Dropping it does not stop the
/// loop — call `stop()` explicitly, mirroring the original's `Timer.cancel`.
pub struct LeaseKeeperHandle {
    stop: Arc<tokio::sync::Notify>,
}

impl LeaseKeeperHandle {
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Periodically re-extends a lease by calling `extend_fn` every
/// `polling_interval`, until it reports `Expired`/`Lost` or `stop()` is
/// called. Mirrors the renewal thread each of `lock`, `LockingQueue.get`
/// and `LockingQueue`'s per-item extension spin up in the original
/// implementation, generalized behind the injected `TaskSpawner`.
pub struct LeaseKeeper;

impl LeaseKeeper {
    /// Starts renewing `resource` in the background. Returns `None` without
    /// spawning anything if an identical `(resource, extend_fn)` pair is
    /// already being renewed.
    pub fn hold(
        resource: &str,
        extend_fn: Arc<ExtendFn>,
        polling_interval: Duration,
        spawner: &dyn TaskSpawner,
    ) -> Option<LeaseKeeperHandle> {
        let key = dedup_key(resource, &extend_fn);
        {
            let mut active = ACTIVE_KEEPERS.lock().unwrap();
            if !active.insert(key.clone()) {
                debug!(resource, "lease keeper already running for this closure, skipping");
                return None;
            }
        }

        let stop = Arc::new(tokio::sync::Notify::new());
        let stop_for_task = Arc::clone(&stop);
        let resource_owned = resource.to_string();

        spawner.spawn(Box::pin(async move {
            loop {
                tokio::select! {
                    _ = stop_for_task.notified() => {
                        debug!(resource = %resource_owned, "lease keeper stopped");
                        break;
                    }
                    _ = tokio::time::sleep(polling_interval) => {
                        match extend_fn().await {
                            ExtendOutcome::Extended => continue,
                            ExtendOutcome::Expired => {
                                warn!(resource = %resource_owned, "lease expired, stopping keeper");
                                break;
                            }
                            ExtendOutcome::Lost => {
                                warn!(resource = %resource_owned, "lease lost to another client, stopping keeper");
                                break;
                            }
                        }
                    }
                }
            }
            ACTIVE_KEEPERS.lock().unwrap().remove(&key);
        }));

        Some(LeaseKeeperHandle { stop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ImmediateSpawner;
    impl TaskSpawner for ImmediateSpawner {
        fn spawn(&self, fut: Pin<Box<dyn Future<Output = ()> + Send>>) {
            tokio::spawn(fut);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn renews_until_lost() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let extend: Arc<ExtendFn> = Arc::new(move || {
            let calls = Arc::clone(&calls2);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= 3 {
                    ExtendOutcome::Lost
                } else {
                    ExtendOutcome::Extended
                }
            })
        });

        let handle = LeaseKeeper::hold(
            "my-resource",
            Arc::clone(&extend),
            Duration::from_millis(10),
            &ImmediateSpawner,
        )
        .expect("first hold should start a keeper");

        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        assert!(calls.load(Ordering::SeqCst) >= 3);
        handle.stop();
    }

    #[tokio::test]
    async fn duplicate_closure_is_not_started_twice() {
        let extend: Arc<ExtendFn> =
            Arc::new(|| Box::pin(async { ExtendOutcome::Extended }));

        let first = LeaseKeeper::hold(
            "dup",
            Arc::clone(&extend),
            Duration::from_secs(60),
            &ImmediateSpawner,
        );
        let second = LeaseKeeper::hold(
            "dup",
            Arc::clone(&extend),
            Duration::from_secs(60),
            &ImmediateSpawner,
        );
        assert!(first.is_some());
        assert!(second.is_none());
        first.unwrap().stop();
    }
}
