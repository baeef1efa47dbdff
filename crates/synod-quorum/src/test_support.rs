//! In-memory stand-in for a cluster of Redis-compatible servers, driving the
//! same script semantics as `synod_script::scripts` without any network I/O.
//! Used by this crate's own tests and re-exported (behind the
//! `test-support` feature) so `synod-lock`/`synod-register`/`synod-queue`
//! can write deterministic unit tests instead of needing live servers.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use synod_core::{LogicalError, SynodError};
use synod_script::{ScriptArg, ScriptExecutor, ScriptName, SlotOutcome};

#[derive(Default)]
struct FakeServer {
    kv: std::collections::HashMap<String, String>,
    zsets: std::collections::HashMap<String, BTreeMap<String, f64>>,
}

/// A fixed-size cluster of [`FakeServer`]s. Indices in `down` are treated as
/// transport failures for every call, regardless of script.
pub struct FakeCluster {
    servers: Vec<Mutex<FakeServer>>,
    down: Mutex<std::collections::HashSet<usize>>,
}

impl FakeCluster {
    pub fn new(n: usize) -> Self {
        Self {
            servers: (0..n).map(|_| Mutex::new(FakeServer::default())).collect(),
            down: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn set_down(&self, idx: usize, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(idx);
        } else {
            set.remove(&idx);
        }
    }

    fn arg_str(args: &[ScriptArg], i: usize) -> String {
        match &args[i] {
            ScriptArg::Str(s) => s.clone(),
            ScriptArg::Int(n) => n.to_string(),
            ScriptArg::Float(f) => f.to_string(),
        }
    }

    fn arg_f64(args: &[ScriptArg], i: usize) -> f64 {
        match &args[i] {
            ScriptArg::Float(f) => *f,
            ScriptArg::Int(n) => *n as f64,
            ScriptArg::Str(s) => s.parse().unwrap_or(0.0),
        }
    }

    fn eval_status(
        &self,
        name: ScriptName,
        idx: usize,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<String, LogicalError> {
        let mut srv = self.servers[idx].lock().unwrap();
        match name {
            ScriptName::LLock => {
                let path = &keys[0];
                let client_id = Self::arg_str(args, 0);
                let holder = srv.kv.get(path).cloned();
                if holder.is_none() || holder.as_deref() == Some(client_id.as_str()) {
                    srv.kv.insert(path.clone(), client_id);
                    Ok("locked".into())
                } else {
                    Err(LogicalError::AlreadyLocked)
                }
            }
            ScriptName::LUnlock => {
                let path = &keys[0];
                let client_id = Self::arg_str(args, 0);
                if srv.kv.get(path) == Some(&client_id) {
                    srv.kv.remove(path);
                    Ok("unlocked".into())
                } else {
                    Err(LogicalError::AlreadyLocked)
                }
            }
            ScriptName::LExtend => {
                let path = &keys[0];
                let expireat = Self::arg_f64(args, 0);
                let client_id = Self::arg_str(args, 1);
                if srv.kv.get(path) == Some(&client_id) {
                    if expireat < 0.0 {
                        Err(LogicalError::InvalidExpireAt)
                    } else {
                        Ok("extended".into())
                    }
                } else {
                    Err(LogicalError::AlreadyLocked)
                }
            }
            ScriptName::GsSet => {
                let path = &keys[0];
                let value = Self::arg_str(args, 0);
                let ts = Self::arg_f64(args, 1);
                let ts_key = format!("{path}:ts");
                let cur_ts: f64 = srv.kv.get(&ts_key).and_then(|s| s.parse().ok()).unwrap_or(f64::MIN);
                if ts >= cur_ts {
                    srv.kv.insert(path.clone(), value);
                    srv.kv.insert(ts_key, ts.to_string());
                    Ok("set".into())
                } else {
                    Err(LogicalError::StaleWrite)
                }
            }
            ScriptName::LqPut => {
                let queue = &keys[0];
                let handle_key = Self::arg_str(args, 0);
                let priority = Self::arg_f64(args, 1);
                srv.zsets
                    .entry(queue.clone())
                    .or_default()
                    .entry(handle_key)
                    .or_insert(priority);
                Ok("put".into())
            }
            ScriptName::LqGet => {
                let queue = &keys[0];
                let client_id = Self::arg_str(args, 0);
                let top = srv
                    .zsets
                    .get(queue)
                    .and_then(|z| z.iter().min_by(|a, b| a.1.partial_cmp(b.1).unwrap()))
                    .map(|(k, _)| k.clone());
                match top {
                    None => Err(LogicalError::QueueEmpty),
                    Some(handle_key) => {
                        let state = srv.kv.get(&handle_key).cloned();
                        if state.as_deref().is_some_and(|s| !s.is_empty()) {
                            Err(LogicalError::AlreadyLocked)
                        } else {
                            srv.kv.insert(handle_key.clone(), client_id);
                            Ok(handle_key)
                        }
                    }
                }
            }
            ScriptName::LqLock => {
                let handle_key = &keys[0];
                let queue = &keys[1];
                let rand_score = Self::arg_f64(args, 1);
                let client_id = Self::arg_str(args, 2);
                let state = srv.kv.get(handle_key).cloned();
                if state.as_deref() == Some(synod_core::COMPLETED_MARKER) {
                    Err(LogicalError::AlreadyCompleted)
                } else if state.as_deref().is_some_and(|s| !s.is_empty() && s != client_id) {
                    Err(LogicalError::AlreadyLocked)
                } else {
                    srv.kv.insert(handle_key.clone(), client_id);
                    srv.zsets
                        .entry(queue.clone())
                        .or_default()
                        .insert(handle_key.clone(), rand_score);
                    Ok("locked".into())
                }
            }
            ScriptName::LqUnlock => {
                let handle_key = &keys[0];
                let client_id = Self::arg_str(args, 0);
                if srv.kv.get(handle_key) == Some(&client_id) {
                    srv.kv.remove(handle_key);
                    Ok("unlocked".into())
                } else {
                    Err(LogicalError::AlreadyLocked)
                }
            }
            ScriptName::LqConsume => {
                let handle_key = &keys[0];
                let queue = &keys[1];
                let client_id = Self::arg_str(args, 0);
                if srv.kv.get(handle_key) == Some(&client_id) {
                    srv.kv
                        .insert(handle_key.clone(), synod_core::COMPLETED_MARKER.to_string());
                    if let Some(z) = srv.zsets.get_mut(queue) {
                        z.remove(handle_key);
                    }
                    Ok("consumed".into())
                } else {
                    Err(LogicalError::AlreadyLocked)
                }
            }
            ScriptName::LqExtend => {
                let handle_key = &keys[0];
                let client_id = Self::arg_str(args, 1);
                if srv.kv.get(handle_key) == Some(&client_id) {
                    Ok("extended".into())
                } else {
                    Err(LogicalError::AlreadyLocked)
                }
            }
            other => unreachable!("{other:?} is not a status-shaped script"),
        }
    }

    fn eval_int(&self, name: ScriptName, idx: usize, keys: &[String]) -> i64 {
        let srv = self.servers[idx].lock().unwrap();
        match name {
            ScriptName::GsExists => i64::from(srv.kv.contains_key(&keys[0])),
            ScriptName::GsTtl => {
                if srv.kv.contains_key(&keys[0]) {
                    1000
                } else {
                    -2
                }
            }
            ScriptName::LqQsize => srv
                .zsets
                .get(&keys[0])
                .map(|z| z.len() as i64)
                .unwrap_or(0),
            other => unreachable!("{other:?} is not an int-shaped script"),
        }
    }

    fn eval_register_read(&self, idx: usize, keys: &[String]) -> Option<(String, i64)> {
        let srv = self.servers[idx].lock().unwrap();
        let path = &keys[0];
        let value = srv.kv.get(path)?.clone();
        let ts = srv
            .kv
            .get(&format!("{path}:ts"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Some((value, ts))
    }
}

#[async_trait]
impl ScriptExecutor for FakeCluster {
    async fn run_status(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<String>)> {
        let down = self.down.lock().unwrap().clone();
        servers
            .iter()
            .map(|&idx| {
                if down.contains(&idx) {
                    return (
                        idx,
                        SlotOutcome::Transport(SynodError::Transport {
                            server: idx,
                            source_msg: "fake server down".into(),
                        }),
                    );
                }
                let outcome = match self.eval_status(name, idx, keys, args) {
                    Ok(v) => SlotOutcome::Value(v),
                    Err(l) => SlotOutcome::Logical(l),
                };
                (idx, outcome)
            })
            .collect()
    }

    async fn run_int(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        _args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<i64>)> {
        let down = self.down.lock().unwrap().clone();
        servers
            .iter()
            .map(|&idx| {
                if down.contains(&idx) {
                    return (
                        idx,
                        SlotOutcome::Transport(SynodError::Transport {
                            server: idx,
                            source_msg: "fake server down".into(),
                        }),
                    );
                }
                (idx, SlotOutcome::Value(self.eval_int(name, idx, keys)))
            })
            .collect()
    }

    async fn run_register_read(
        &self,
        _name: ScriptName,
        servers: &[usize],
        keys: &[String],
        _args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<Option<(String, i64)>>)> {
        let down = self.down.lock().unwrap().clone();
        servers
            .iter()
            .map(|&idx| {
                if down.contains(&idx) {
                    return (
                        idx,
                        SlotOutcome::Transport(SynodError::Transport {
                            server: idx,
                            source_msg: "fake server down".into(),
                        }),
                    );
                }
                (idx, SlotOutcome::Value(self.eval_register_read(idx, keys)))
            })
            .collect()
    }

    fn server_count(&self) -> usize {
        self.servers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_then_relock_by_same_client_succeeds() {
        let cluster = FakeCluster::new(3);
        let keys = vec!["lock:a".to_string()];
        let args = vec![ScriptArg::Str("c1".into()), ScriptArg::Int(9999999999)];
        let r1 = cluster.run_status(ScriptName::LLock, &[0, 1, 2], &keys, &args).await;
        assert!(r1.iter().all(|(_, o)| o.is_value()));

        let r2 = cluster.run_status(ScriptName::LLock, &[0], &keys, &args).await;
        assert!(r2[0].1.is_value());
    }

    #[tokio::test]
    async fn lock_by_other_client_fails() {
        let cluster = FakeCluster::new(1);
        let keys = vec!["lock:a".to_string()];
        let a1 = vec![ScriptArg::Str("c1".into()), ScriptArg::Int(9999999999)];
        let a2 = vec![ScriptArg::Str("c2".into()), ScriptArg::Int(9999999999)];
        cluster.run_status(ScriptName::LLock, &[0], &keys, &a1).await;
        let r2 = cluster.run_status(ScriptName::LLock, &[0], &keys, &a2).await;
        assert!(matches!(r2[0].1, SlotOutcome::Logical(LogicalError::AlreadyLocked)));
    }

    #[tokio::test]
    async fn down_server_reports_transport_failure() {
        let cluster = FakeCluster::new(2);
        cluster.set_down(1, true);
        let keys = vec!["lock:a".to_string()];
        let args = vec![ScriptArg::Str("c1".into()), ScriptArg::Int(9999999999)];
        let results = cluster.run_status(ScriptName::LLock, &[0, 1], &keys, &args).await;
        assert!(results[0].1.is_value());
        assert!(matches!(results[1].1, SlotOutcome::Transport(_)));
    }
}
