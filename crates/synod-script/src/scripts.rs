/// Identifies one of the server-side Lua scripts a [`crate::ScriptRunner`]
/// can invoke. Mirrors the `SCRIPTS` tables in the original implementation's
/// `lock.py`, `getset.py` and `lockingqueue.py`, collapsed into a single
/// enum so the runner can key its SHA cache on `(ScriptName, server index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptName {
    /// `KEYS = [path]`, `ARGV = [client_id, expireat]`
    LLock,
    /// `KEYS = [path]`, `ARGV = [client_id]`
    LUnlock,
    /// `KEYS = [path]`, `ARGV = [expireat, client_id]`
    LExtend,
    /// `KEYS = [path]`
    GsGet,
    /// `KEYS = [path]`, `ARGV = [value, ts]`
    GsSet,
    /// `KEYS = [path]`
    GsExists,
    /// `KEYS = [path]`
    GsTtl,
    /// `KEYS = [queue]`, `ARGV = [handle_key, priority]`
    LqPut,
    /// `KEYS = [queue]`, `ARGV = [client_id, expireat]`
    LqGet,
    /// `KEYS = [handle_key, queue]`, `ARGV = [expireat, rand_score, client_id]`
    LqLock,
    /// `KEYS = [handle_key]`, `ARGV = [client_id]`
    LqUnlock,
    /// `KEYS = [handle_key, queue]`, `ARGV = [client_id]`
    LqConsume,
    /// `KEYS = [handle_key]`, `ARGV = [expireat, client_id]`
    LqExtend,
    /// `KEYS = [queue]`
    LqQsize,
}

impl ScriptName {
    /// The Lua source for this script. All six `*lock*` scripts return
    /// `"locked"` / `"unlocked"` / `"extended"` on success and the literal
    /// error strings `LogicalError::from_message` knows how to parse on
    /// failure, so callers never have to special-case Redis's own error
    /// replies.
    pub fn source(self) -> &'static str {
        match self {
            ScriptName::LLock => LLOCK,
            ScriptName::LUnlock => LUNLOCK,
            ScriptName::LExtend => LEXTEND,
            ScriptName::GsGet => GS_GET,
            ScriptName::GsSet => GS_SET,
            ScriptName::GsExists => GS_EXISTS,
            ScriptName::GsTtl => GS_TTL,
            ScriptName::LqPut => LQ_PUT,
            ScriptName::LqGet => LQ_GET,
            ScriptName::LqLock => LQ_LOCK,
            ScriptName::LqUnlock => LQ_UNLOCK,
            ScriptName::LqConsume => LQ_CONSUME,
            ScriptName::LqExtend => LQ_EXTEND,
            ScriptName::LqQsize => LQ_QSIZE,
        }
    }
}

// ── MajorityLock ─────────────────────────────────────────────────────────

const LLOCK: &str = r#"
local path = KEYS[1]
local client_id = ARGV[1]
local expireat = ARGV[2]
local holder = redis.call("GET", path)
if holder == false or holder == client_id then
    redis.call("SET", path, client_id)
    redis.call("EXPIREAT", path, expireat)
    return "locked"
end
return redis.error_reply("already locked")
"#;

const LUNLOCK: &str = r#"
local path = KEYS[1]
local client_id = ARGV[1]
local holder = redis.call("GET", path)
if holder == client_id then
    redis.call("DEL", path)
    return "unlocked"
end
return redis.error_reply("already locked")
"#;

const LEXTEND: &str = r#"
local path = KEYS[1]
local expireat = ARGV[1]
local client_id = ARGV[2]
local holder = redis.call("GET", path)
if holder == client_id then
    if tonumber(expireat) < 0 then
        return redis.error_reply("invalid expireat")
    end
    redis.call("EXPIREAT", path, expireat)
    return "extended"
end
return redis.error_reply("already locked")
"#;

// ── MajorityRegister ─────────────────────────────────────────────────────

const GS_GET: &str = r#"
local path = KEYS[1]
local value = redis.call("GET", path)
if value == false then
    return false
end
local ts = redis.call("GET", path .. ":ts")
return {value, ts}
"#;

const GS_SET: &str = r#"
local path = KEYS[1]
local value = ARGV[1]
local ts = ARGV[2]
local cur_ts = redis.call("GET", path .. ":ts")
if cur_ts == false or tonumber(ts) >= tonumber(cur_ts) then
    redis.call("SET", path, value)
    redis.call("SET", path .. ":ts", ts)
    return "set"
end
return redis.error_reply("stale write")
"#;

const GS_EXISTS: &str = r#"
local path = KEYS[1]
return redis.call("EXISTS", path)
"#;

const GS_TTL: &str = r#"
local path = KEYS[1]
return redis.call("PTTL", path)
"#;

// ── LockingQueue ─────────────────────────────────────────────────────────

const LQ_PUT: &str = r#"
local queue = KEYS[1]
local handle_key = ARGV[1]
local priority = ARGV[2]
redis.call("ZADD", queue, "NX", priority, handle_key)
return "put"
"#;

const LQ_GET: &str = r#"
local queue = KEYS[1]
local client_id = ARGV[1]
local expireat = ARGV[2]
local top = redis.call("ZRANGE", queue, 0, 0)
if #top == 0 then
    return redis.error_reply("queue empty")
end
local handle_key = top[1]
local state = redis.call("GET", handle_key)
if state and state ~= "" then
    return redis.error_reply("already locked")
end
redis.call("SET", handle_key, client_id)
redis.call("EXPIREAT", handle_key, expireat)
return handle_key
"#;

const LQ_LOCK: &str = r#"
local handle_key = KEYS[1]
local queue = KEYS[2]
local expireat = ARGV[1]
local rand_score = ARGV[2]
local client_id = ARGV[3]
local state = redis.call("GET", handle_key)
if state == "completed" then
    return redis.error_reply("already completed")
end
if state and state ~= "" and state ~= client_id then
    return redis.error_reply("already locked")
end
redis.call("SET", handle_key, client_id)
redis.call("EXPIREAT", handle_key, expireat)
redis.call("ZADD", queue, rand_score, handle_key)
return "locked"
"#;

const LQ_UNLOCK: &str = r#"
local handle_key = KEYS[1]
local client_id = ARGV[1]
local state = redis.call("GET", handle_key)
if state == client_id then
    redis.call("DEL", handle_key)
    return "unlocked"
end
return redis.error_reply("already locked")
"#;

const LQ_CONSUME: &str = r#"
local handle_key = KEYS[1]
local queue = KEYS[2]
local client_id = ARGV[1]
local state = redis.call("GET", handle_key)
if state == client_id then
    redis.call("SET", handle_key, "completed")
    redis.call("PERSIST", handle_key)
    redis.call("ZREM", queue, handle_key)
    return "consumed"
end
return redis.error_reply("already locked")
"#;

const LQ_EXTEND: &str = r#"
local handle_key = KEYS[1]
local expireat = ARGV[1]
local client_id = ARGV[2]
local state = redis.call("GET", handle_key)
if state == client_id then
    redis.call("EXPIREAT", handle_key, expireat)
    return "extended"
end
return redis.error_reply("already locked")
"#;

const LQ_QSIZE: &str = r#"
local queue = KEYS[1]
return redis.call("ZCARD", queue)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_script_has_nonempty_source() {
        for name in [
            ScriptName::LLock,
            ScriptName::LUnlock,
            ScriptName::LExtend,
            ScriptName::GsGet,
            ScriptName::GsSet,
            ScriptName::GsExists,
            ScriptName::GsTtl,
            ScriptName::LqPut,
            ScriptName::LqGet,
            ScriptName::LqLock,
            ScriptName::LqUnlock,
            ScriptName::LqConsume,
            ScriptName::LqExtend,
            ScriptName::LqQsize,
        ] {
            assert!(!name.source().trim().is_empty());
        }
    }
}
