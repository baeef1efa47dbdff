use std::future::Future;
use std::pin::Pin;

use futures::future::join_all;

/// Decides how a [`crate::ScriptRunner`] fans a script call out across
/// servers: genuinely concurrently, or one at a time. Production code wants
/// the former; tests that assert on call ordering against a fake server
/// want the latter. Kept as an injected trait rather than a runner
/// constructor flag so callers can swap it without touching the runner.
pub trait ParallelMapper: Send + Sync {
    fn is_parallel(&self) -> bool;
}

/// Default mapper: every per-server future is polled concurrently via
/// `futures::future::join_all`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JoinAllMapper;

impl ParallelMapper for JoinAllMapper {
    fn is_parallel(&self) -> bool {
        true
    }
}

/// Runs per-server futures strictly one after another, in the order they
/// were submitted. Useful for deterministic tests against fake servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialMapper;

impl ParallelMapper for SequentialMapper {
    fn is_parallel(&self) -> bool {
        false
    }
}

pub(crate) type BoxedSlotFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Drives `futures` to completion according to `mapper`'s fan-out policy.
pub(crate) async fn run_all<'a, T>(
    mapper: &dyn ParallelMapper,
    futures: Vec<BoxedSlotFuture<'a, T>>,
) -> Vec<T> {
    if mapper.is_parallel() {
        join_all(futures).await
    } else {
        let mut out = Vec::with_capacity(futures.len());
        for fut in futures {
            out.push(fut.await);
        }
        out
    }
}
