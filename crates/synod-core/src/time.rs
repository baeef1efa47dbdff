use std::time::Duration;

/// Current wall-clock time as fractional seconds since the Unix epoch.
/// Used for `insert_time` in queue handles and as the register's write
/// timestamp, matching Python's `time.time()` in the original.
pub fn now_f64() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Current wall-clock time as whole seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `(t_start, t_expireat)` for a lease of `timeout` starting now.
/// `t_expireat` is an integer Unix timestamp, matching the `EXPIREAT`
/// Redis command's argument shape.
pub fn get_expireat(timeout: Duration) -> (f64, i64) {
    let t = now_f64();
    (t, (t + timeout.as_secs_f64()) as i64)
}

/// Seconds remaining before `t_expireat` is no longer safe to rely on, once
/// clock drift and the keeper's own polling latency are subtracted.
/// `None` means the lease should be treated as already invalid.
///
/// `secs_left = t_expireat - now - clock_drift - polling_interval`
pub fn lock_still_valid(
    t_expireat: i64,
    clock_drift: Duration,
    polling_interval: Duration,
) -> Option<i64> {
    if t_expireat < 0 {
        return None;
    }
    let secs_left =
        t_expireat - now_secs() - clock_drift.as_secs() as i64 - polling_interval.as_secs() as i64;
    if secs_left <= 0 {
        None
    } else {
        Some(secs_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lease_is_valid() {
        let (_, expireat) = get_expireat(Duration::from_secs(30));
        assert!(lock_still_valid(expireat, Duration::ZERO, Duration::from_secs(5)).is_some());
    }

    #[test]
    fn expired_lease_is_invalid() {
        let now = now_secs();
        assert!(lock_still_valid(now - 10, Duration::ZERO, Duration::from_secs(1)).is_none());
    }

    #[test]
    fn drift_eats_into_validity() {
        let (_, expireat) = get_expireat(Duration::from_secs(10));
        // polling_interval + clock_drift close to the whole timeout leaves nothing.
        assert!(lock_still_valid(expireat, Duration::from_secs(5), Duration::from_secs(5)).is_none());
    }
}
