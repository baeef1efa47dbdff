use std::fmt;

use crate::error::{SynodError, SynodResult};

/// A random identifier chosen once per client process, used as the fencing
/// value stored at lock keys and as the owner token in the locking queue.
///
/// Masked to 63 bits so it round-trips through scripting languages (Lua's
/// `number` type, which the underlying servers use) without losing precision
/// the way a full `u64` would near `2^63`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    const MASK: u64 = 0x7FFF_FFFF_FFFF_FFFF;

    /// Generate a fresh, process-unique identifier.
    pub fn generate() -> Self {
        Self(rand::random::<u64>() & Self::MASK)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

/// Index of a server within the configured cluster list. Never transmitted
/// over the wire — used only for logging and read-repair targeting.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ServerIndex(pub usize);

impl fmt::Display for ServerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server[{}]", self.0)
    }
}

/// The literal sentinel value a server stores at a queue-item lock key once
/// `consume` has succeeded there. Terminal and monotone: no later write may
/// replace it (enforced inside `lq_consume`/`lq_lock`, not by the client).
pub const COMPLETED_MARKER: &str = "completed";

/// An opaque handle identifying one queue item: `"<priority>:<insert_time>:<item>"`.
///
/// Servers never parse this string — it is just the ordered-set member used
/// as both the `Q` membership key and the per-item lock key. Only the client
/// decodes it, and only after a successful `get`.
#[derive(Clone, PartialEq, Debug)]
pub struct QueueHandle {
    pub priority: i64,
    pub insert_time: f64,
    pub item: String,
}

impl QueueHandle {
    pub fn encode(priority: i64, insert_time: f64, item: &str) -> String {
        format!("{priority}:{insert_time}:{item}")
    }

    /// Parse a handle string produced by `encode`. `item` is taken verbatim
    /// as everything after the second `:`, so items may themselves contain
    /// colons.
    pub fn parse(raw: &str) -> SynodResult<Self> {
        let mut parts = raw.splitn(3, ':');
        let priority = parts
            .next()
            .ok_or_else(|| SynodError::Other(format!("malformed queue handle: {raw:?}")))?
            .parse::<i64>()
            .map_err(|e| SynodError::Other(format!("bad priority in handle {raw:?}: {e}")))?;
        let insert_time = parts
            .next()
            .ok_or_else(|| SynodError::Other(format!("malformed queue handle: {raw:?}")))?
            .parse::<f64>()
            .map_err(|e| SynodError::Other(format!("bad insert_time in handle {raw:?}: {e}")))?;
        let item = parts
            .next()
            .ok_or_else(|| SynodError::Other(format!("malformed queue handle: {raw:?}")))?
            .to_string();
        Ok(Self { priority, insert_time, item })
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::encode(self.priority, self.insert_time, &self.item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_fits_63_bits() {
        for _ in 0..1000 {
            let id = ClientId::generate();
            assert!(id.as_u64() <= ClientId::MASK);
        }
    }

    #[test]
    fn queue_handle_round_trips() {
        let raw = QueueHandle::encode(100, 1719600000.125, "order:42");
        let parsed = QueueHandle::parse(&raw).unwrap();
        assert_eq!(parsed.priority, 100);
        assert_eq!(parsed.insert_time, 1719600000.125);
        assert_eq!(parsed.item, "order:42");
    }

    #[test]
    fn queue_handle_rejects_malformed() {
        assert!(QueueHandle::parse("not-a-handle").is_err());
    }
}
