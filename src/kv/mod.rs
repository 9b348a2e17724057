//! Store adapter: the key-value capability experiments persist through.
//!
//! The store is the single source of truth for lifecycle timestamps. The one
//! primitive cross-process correctness depends on is [`KvStore::set_if_absent`],
//! which must be atomic in every backend.
//!
//! # Example
//!
//! ```rust
//! use splitlab::kv::{KvStore, MemoryKvStore};
//!
//! # fn example() -> splitlab::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! assert!(store.set_if_absent("key", b"first".to_vec())?);
//! assert!(!store.set_if_absent("key", b"second".to_vec())?);
//! assert_eq!(store.get("key")?, Some(b"first".to_vec()));
//!
//! store.delete("key")?;
//! assert!(!store.exists("key")?);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryKvStore;

use crate::Result;

/// Blocking key-value store used by a [`Playground`](crate::Playground).
///
/// Every call is one round-trip. Backends report a down connection through
/// [`KvStore::is_connected`] and by returning
/// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).
pub trait KvStore: Send + Sync {
    /// Whether the backend currently has a live connection.
    fn is_connected(&self) -> bool {
        true
    }

    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically set a value only if the key is absent.
    ///
    /// Returns `true` if this call wrote the value.
    fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool>;

    /// Atomically increment the integer counter at `key`, starting from 0.
    ///
    /// Returns the new value.
    fn incr(&self, key: &str) -> Result<i64>;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> Result<bool>;
}

/// Encode an integer the way counters and timestamps are stored.
#[must_use]
pub fn encode_i64(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decode a stored integer. Malformed values decode as `None`.
#[must_use]
pub fn decode_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}
