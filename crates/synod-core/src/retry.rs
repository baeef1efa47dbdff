use std::time::Duration;

use tracing::debug;

use crate::error::{SynodError, SynodResult};

/// Generic retry combinator (spec.md §4.5). Wraps any fallible async
/// operation with a bounded number of attempts, a caller-supplied backoff,
/// an overall deadline, and an acceptance predicate that decides whether a
/// successful result should actually be treated as done.
pub struct RetryPolicy<B> {
    pub nretry: u32,
    pub timeout: Duration,
    pub backoff: B,
}

impl<B> RetryPolicy<B>
where
    B: Fn(Duration) -> Duration,
{
    pub fn new(nretry: u32, timeout: Duration, backoff: B) -> Self {
        Self { nretry, timeout, backoff }
    }

    /// Run `op` until `condition(&result)` is satisfied, `nretry` attempts
    /// are exhausted (`TooManyRetries`), or the elapsed time plus the next
    /// backoff would exceed `timeout` (`Timeout`).
    pub async fn run<T, F, Fut, C>(&self, mut op: F, condition: C) -> SynodResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = SynodResult<T>>,
        C: Fn(&T) -> bool,
    {
        let started = tokio::time::Instant::now();
        let mut delay = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) if condition(&value) => return Ok(value),
                Ok(_) | Err(_) if attempt >= self.nretry => {
                    return Err(SynodError::TooManyRetries(self.nretry));
                }
                outcome => {
                    if let Err(e) = &outcome {
                        debug!(attempt, error = %e, "retry attempt failed");
                    }
                    delay = (self.backoff)(delay);
                    if started.elapsed() + delay > self.timeout {
                        return Err(SynodError::Timeout);
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Exponential backoff starting at `base`, capped at `max`.
pub fn exponential_backoff(base: Duration, max: Duration) -> impl Fn(Duration) -> Duration {
    move |prev| {
        if prev.is_zero() {
            base
        } else {
            std::cmp::min(prev * 2, max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_once_condition_met() {
        let policy = RetryPolicy::new(5, Duration::from_secs(5), exponential_backoff(
            Duration::from_millis(1),
            Duration::from_millis(10),
        ));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result = policy
            .run(
                move || {
                    let calls = Arc::clone(&calls2);
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok::<_, SynodError>(n)
                    }
                },
                |n| *n >= 3,
            )
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_nretry() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5), exponential_backoff(
            Duration::from_millis(1),
            Duration::from_millis(5),
        ));
        let result = policy
            .run(|| async { Ok::<_, SynodError>(0) }, |_| false)
            .await;
        assert!(matches!(result, Err(SynodError::TooManyRetries(3))));
    }

    #[tokio::test]
    async fn gives_up_on_timeout() {
        let policy = RetryPolicy::new(
            1000,
            Duration::from_millis(5),
            exponential_backoff(Duration::from_millis(20), Duration::from_millis(20)),
        );
        let result = policy
            .run(|| async { Ok::<_, SynodError>(0) }, |_| false)
            .await;
        assert!(matches!(result, Err(SynodError::Timeout)));
    }
}
