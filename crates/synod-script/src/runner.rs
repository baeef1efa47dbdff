use std::collections::HashMap;
use std::sync::RwLock;

use redis::aio::MultiplexedConnection;
use redis::{FromRedisValue, RedisError};
use tracing::{debug, warn};

use synod_core::{LogicalError, SynodError};

use crate::mapper::{run_all, BoxedSlotFuture, ParallelMapper};
use crate::scripts::ScriptName;

/// A single value passed as a Lua `ARGV` entry. Kept as an enum rather than
/// taking `impl redis::ToRedisArgs` generically, since a single script
/// invocation mixes argument types and they all need to be collected into
/// one `Vec` before the call is built.
#[derive(Clone, Debug)]
pub enum ScriptArg {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for ScriptArg {
    fn from(v: i64) -> Self {
        ScriptArg::Int(v)
    }
}

impl From<f64> for ScriptArg {
    fn from(v: f64) -> Self {
        ScriptArg::Float(v)
    }
}

impl From<String> for ScriptArg {
    fn from(v: String) -> Self {
        ScriptArg::Str(v)
    }
}

impl From<&str> for ScriptArg {
    fn from(v: &str) -> Self {
        ScriptArg::Str(v.to_string())
    }
}

impl ScriptArg {
    fn push_onto(&self, cmd: &mut redis::Cmd) {
        match self {
            ScriptArg::Int(i) => {
                cmd.arg(*i);
            }
            ScriptArg::Float(f) => {
                cmd.arg(f.to_string());
            }
            ScriptArg::Str(s) => {
                cmd.arg(s);
            }
        }
    }
}

/// The per-server result of one script invocation, as seen by the quorum
/// core. Transport failures and script-level logical rejections are kept
/// distinct from each other and from a genuine value, because
/// `synod-quorum` treats them differently when tallying a majority.
#[derive(Debug)]
pub enum SlotOutcome<T> {
    Value(T),
    Logical(LogicalError),
    Transport(SynodError),
}

impl<T> SlotOutcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, SlotOutcome::Value(_))
    }

    pub fn value(self) -> Option<T> {
        match self {
            SlotOutcome::Value(v) => Some(v),
            _ => None,
        }
    }
}

fn classify_redis_error(err: RedisError) -> SlotOutcomeError {
    if err.code() == Some("NOSCRIPT") {
        return SlotOutcomeError::NoScript;
    }
    let message = err.detail().map(str::to_string).unwrap_or_else(|| err.to_string());
    if let Some(logical) = LogicalError::from_message(message.trim()) {
        return SlotOutcomeError::Logical(logical);
    }
    SlotOutcomeError::Transport(err.to_string())
}

enum SlotOutcomeError {
    NoScript,
    Logical(LogicalError),
    Transport(String),
}

/// Invokes Lua scripts against a fixed set of independent Redis-compatible
/// servers, caching each script's SHA1 digest per server so steady-state
/// calls are plain `EVALSHA` round trips. A `NOSCRIPT` reply (the script
/// was evicted, or this is the first call after the server restarted)
/// evicts the cached digest and reloads once before giving up on that slot.
///
/// Mirrors `_get_sha` / `run_script` in the original implementation's
/// `util.py`, translated from a single shared dict-of-dicts cache into a
/// `RwLock` keyed on `(ScriptName, server index)`.
pub struct ScriptRunner {
    clients: Vec<redis::Client>,
    mapper: Box<dyn ParallelMapper>,
    handles: RwLock<HashMap<(ScriptName, usize), String>>,
}

impl ScriptRunner {
    pub fn new(clients: Vec<redis::Client>, mapper: Box<dyn ParallelMapper>) -> Self {
        Self {
            clients,
            mapper,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Number of servers this runner is configured against. Declared
    /// cluster size, not the count of servers currently reachable.
    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    /// Runs `name` with `keys`/`args` against every index in
    /// `server_indices`, fanning out according to the injected
    /// [`ParallelMapper`]. Results are returned in the same order as
    /// `server_indices`, paired with the index they came from.
    pub async fn run<T>(
        &self,
        name: ScriptName,
        server_indices: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<T>)>
    where
        T: FromRedisValue + Send,
    {
        let futures: Vec<BoxedSlotFuture<'_, (usize, SlotOutcome<T>)>> = server_indices
            .iter()
            .map(|&idx| {
                let fut = self.run_one::<T>(name, idx, keys, args);
                Box::pin(async move { (idx, fut.await) }) as BoxedSlotFuture<'_, _>
            })
            .collect();
        run_all(self.mapper.as_ref(), futures).await
    }

    async fn run_one<T>(
        &self,
        name: ScriptName,
        idx: usize,
        keys: &[String],
        args: &[ScriptArg],
    ) -> SlotOutcome<T>
    where
        T: FromRedisValue,
    {
        let client = match self.clients.get(idx) {
            Some(c) => c,
            None => {
                return SlotOutcome::Transport(SynodError::Other(format!(
                    "no such server index {idx}"
                )))
            }
        };
        let mut conn = match client.get_multiplexed_tokio_connection().await {
            Ok(c) => c,
            Err(e) => {
                return SlotOutcome::Transport(SynodError::Transport {
                    server: idx,
                    source_msg: e.to_string(),
                })
            }
        };

        let sha = match self.get_or_load_sha(name, idx, &mut conn).await {
            Ok(sha) => sha,
            Err(e) => return SlotOutcome::Transport(e),
        };

        match self.eval_sha::<T>(&sha, keys, args, &mut conn).await {
            Ok(v) => SlotOutcome::Value(v),
            Err(SlotOutcomeError::NoScript) => {
                debug!(server = idx, ?name, "script evicted, reloading");
                self.handles.write().unwrap().remove(&(name, idx));
                let sha = match self.get_or_load_sha(name, idx, &mut conn).await {
                    Ok(sha) => sha,
                    Err(e) => return SlotOutcome::Transport(e),
                };
                match self.eval_sha::<T>(&sha, keys, args, &mut conn).await {
                    Ok(v) => SlotOutcome::Value(v),
                    Err(SlotOutcomeError::Logical(l)) => SlotOutcome::Logical(l),
                    Err(SlotOutcomeError::Transport(source)) => SlotOutcome::Transport(
                        SynodError::Transport { server: idx, source_msg: source },
                    ),
                    Err(SlotOutcomeError::NoScript) => {
                        SlotOutcome::Transport(SynodError::Other(
                            "script reload did not stick".into(),
                        ))
                    }
                }
            }
            Err(SlotOutcomeError::Logical(l)) => SlotOutcome::Logical(l),
            Err(SlotOutcomeError::Transport(source)) => {
                SlotOutcome::Transport(SynodError::Transport { server: idx, source_msg: source })
            }
        }
    }

    async fn get_or_load_sha(
        &self,
        name: ScriptName,
        idx: usize,
        conn: &mut MultiplexedConnection,
    ) -> Result<String, SynodError> {
        if let Some(sha) = self.handles.read().unwrap().get(&(name, idx)) {
            return Ok(sha.clone());
        }
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(name.source())
            .query_async(conn)
            .await
            .map_err(|e| SynodError::Transport {
                server: idx,
                source_msg: e.to_string(),
            })?;
        self.handles
            .write()
            .unwrap()
            .insert((name, idx), sha.clone());
        Ok(sha)
    }

    async fn eval_sha<T>(
        &self,
        sha: &str,
        keys: &[String],
        args: &[ScriptArg],
        conn: &mut MultiplexedConnection,
    ) -> Result<T, SlotOutcomeError>
    where
        T: FromRedisValue,
    {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            arg.push_onto(&mut cmd);
        }
        cmd.query_async(conn).await.map_err(|e| {
            let classified = classify_redis_error(e);
            if let SlotOutcomeError::Transport(msg) = &classified {
                warn!(error = %msg, "script evaluation failed");
            }
            classified
        })
    }
}

/// Narrow, object-safe facade over [`ScriptRunner::run`] covering the three
/// return shapes the scripts in [`crate::scripts`] actually produce. Exists
/// so `synod-lock`/`synod-register`/`synod-queue` can depend on a trait
/// object and be tested against an in-memory fake instead of a live runner.
#[async_trait::async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn run_status(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<String>)>;

    async fn run_int(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<i64>)>;

    async fn run_register_read(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<Option<(String, i64)>>)>;

    fn server_count(&self) -> usize;
}

#[async_trait::async_trait]
impl ScriptExecutor for ScriptRunner {
    async fn run_status(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<String>)> {
        self.run(name, servers, keys, args).await
    }

    async fn run_int(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<i64>)> {
        self.run(name, servers, keys, args).await
    }

    async fn run_register_read(
        &self,
        name: ScriptName,
        servers: &[usize],
        keys: &[String],
        args: &[ScriptArg],
    ) -> Vec<(usize, SlotOutcome<Option<(String, i64)>>)> {
        self.run(name, servers, keys, args).await
    }

    fn server_count(&self) -> usize {
        ScriptRunner::server_count(self)
    }
}
