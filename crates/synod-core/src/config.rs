use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SynodError, SynodResult};

/// Cluster-wide configuration shared by every primitive constructed from a
/// `SynodClient`. Mirrors the public constructor surface from spec.md §6:
/// `(clients, n_servers, lock_timeout, polling_interval, Timer, map_async)`
/// minus the injected `Timer`/`map_async`, which are formalized as the
/// `TaskSpawner`/`ParallelMapper` traits in `synod-quorum`/`synod-script`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Redis-compatible connection URIs, one per server, e.g.
    /// `"redis://127.0.0.1:6379"`. May be shorter than `n_servers` if some
    /// servers are temporarily unreachable, but never shorter than quorum.
    pub server_urls: Vec<String>,

    /// Declared total cluster size. This is the divisor for quorum math, not
    /// `server_urls.len()` — a client connected to fewer than all servers
    /// still computes quorum against the full, nominal cluster.
    pub n_servers: usize,

    /// Seconds after which a lock/queue-item lease is considered invalid.
    #[serde(with = "duration_secs")]
    pub lock_timeout: Duration,

    /// How often a `LeaseKeeper` re-extends a lease. Must be strictly less
    /// than `lock_timeout`.
    #[serde(with = "duration_secs")]
    pub polling_interval: Duration,

    /// Assumed worst-case clock drift between this client and the servers.
    /// Defaults to zero; see spec.md §9.
    #[serde(with = "duration_secs", default)]
    pub clock_drift: Duration,
}

impl ClusterConfig {
    pub fn new(
        server_urls: Vec<String>,
        n_servers: usize,
        lock_timeout: Duration,
        polling_interval: Duration,
    ) -> SynodResult<Self> {
        let cfg = Self {
            server_urls,
            n_servers,
            lock_timeout,
            polling_interval,
            clock_drift: Duration::ZERO,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_clock_drift(mut self, clock_drift: Duration) -> Self {
        self.clock_drift = clock_drift;
        self
    }

    /// Load from a JSON file, the way `chronx-node` loads `GenesisParams`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SynodResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SynodError::Config(format!("reading cluster config {}: {e}", path.display()))
        })?;
        let cfg: Self = serde_json::from_str(&text)
            .map_err(|e| SynodError::Config(format!("parsing cluster config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn quorum(&self) -> usize {
        self.n_servers / 2 + 1
    }

    fn validate(&self) -> SynodResult<()> {
        if self.server_urls.len() < self.quorum() {
            return Err(SynodError::Config(format!(
                "must connect to at least {} of {} servers to obtain majority, got {}",
                self.quorum(),
                self.n_servers,
                self.server_urls.len()
            )));
        }
        if self.polling_interval >= self.lock_timeout {
            return Err(SynodError::Config(
                "polling_interval must be strictly less than lock_timeout".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("redis://127.0.0.1:{}", 6379 + i)).collect()
    }

    #[test]
    fn quorum_is_floor_n_over_2_plus_1() {
        let cfg = ClusterConfig::new(
            urls(3),
            3,
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(cfg.quorum(), 2);
    }

    #[test]
    fn rejects_too_few_connected_clients() {
        let err = ClusterConfig::new(
            urls(1),
            3,
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .unwrap_err();
        assert!(matches!(err, SynodError::Config(_)));
    }

    #[test]
    fn rejects_polling_interval_not_less_than_timeout() {
        let err = ClusterConfig::new(
            urls(3),
            3,
            Duration::from_secs(10),
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(matches!(err, SynodError::Config(_)));
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = ClusterConfig::new(
            urls(5),
            5,
            Duration::from_secs(30),
            Duration::from_secs_f64(6.0),
        )
        .unwrap();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ClusterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_servers, 5);
        assert_eq!(back.lock_timeout, Duration::from_secs(30));
    }
}
