use thiserror::Error;

/// Script-level outcomes that are modelled as error values rather than
/// successful return values. These never escape a primitive boundary as a
/// transport failure — the quorum core consumes them and folds them into a
/// majority decision (see `synod-quorum::core`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LogicalError {
    #[error("queue empty")]
    QueueEmpty,
    #[error("already locked")]
    AlreadyLocked,
    #[error("already completed")]
    AlreadyCompleted,
    #[error("invalid expireat")]
    InvalidExpireAt,
    #[error("expired")]
    Expired,
    #[error("stale write")]
    StaleWrite,
}

impl LogicalError {
    /// Match the literal Lua table error text each script returns (see
    /// `synod_script::scripts`) back to a typed variant.
    pub fn from_message(msg: &str) -> Option<Self> {
        match msg {
            "queue empty" => Some(Self::QueueEmpty),
            "already locked" => Some(Self::AlreadyLocked),
            "already completed" => Some(Self::AlreadyCompleted),
            "invalid expireat" => Some(Self::InvalidExpireAt),
            "expired" => Some(Self::Expired),
            "stale write" => Some(Self::StaleWrite),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SynodError {
    // ── Transport ────────────────────────────────────────────────────────────
    #[error("server {server} unreachable or misbehaving: {source_msg}")]
    Transport { server: usize, source_msg: String },

    // ── Script-level logical outcomes ───────────────────────────────────────
    #[error("logical error: {0}")]
    Logical(#[from] LogicalError),

    // ── Quorum failures ──────────────────────────────────────────────────────
    #[error("could not establish quorum")]
    NoMajority,

    #[error("consume confirmed on zero servers")]
    ConsumeError,

    #[error("cannot obtain lock: {0}")]
    CannotObtainLock(String),

    // ── Retry combinator ─────────────────────────────────────────────────────
    #[error("exceeded retry budget ({0} attempts)")]
    TooManyRetries(u32),

    #[error("retry deadline exceeded")]
    Timeout,

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

pub type SynodResult<T> = Result<T, SynodError>;
