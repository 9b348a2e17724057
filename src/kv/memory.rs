//! In-memory KV store implementation using `DashMap`.
//!
//! Shared between several playgrounds through an `Arc`, it stands in for an
//! external store reached by several processes. The connection flag lets
//! callers simulate an outage.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{decode_i64, encode_i64, KvStore};
use crate::{Error, Result};

/// In-memory key-value store using lock-free concurrent hashmap.
///
/// `set_if_absent` and `incr` go through `DashMap`'s entry API, which holds
/// the shard lock for the duration of the check-and-write.
///
/// # Example
///
/// ```rust
/// use splitlab::kv::{KvStore, MemoryKvStore};
///
/// # fn example() -> splitlab::Result<()> {
/// let store = MemoryKvStore::new();
/// store.set_if_absent("hello", b"world".to_vec())?;
/// assert_eq!(store.get("hello")?, Some(b"world".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryKvStore {
    store: DashMap<String, Vec<u8>>,
    connected: AtomicBool,
}

impl MemoryKvStore {
    /// Create a new in-memory KV store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
            connected: AtomicBool::new(true),
        }
    }

    /// Drop the connection; every operation fails until [`Self::reconnect`].
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Restore the connection. Data survives the outage.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("memory store disconnected".to_string()))
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_connected()?;
        Ok(self.store.get(key).map(|v| v.value().clone()))
    }

    fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        self.ensure_connected()?;
        match self.store.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(true)
            }
        }
    }

    fn incr(&self, key: &str) -> Result<i64> {
        self.ensure_connected()?;
        let mut entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| encode_i64(0));
        let current = decode_i64(entry.value()).ok_or_else(|| {
            Error::ParseError(format!("value at {key} is not an integer"))
        })?;
        let next = current + 1;
        *entry.value_mut() = encode_i64(next);
        Ok(next)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.ensure_connected()?;
        self.store.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self.store.contains_key(key))
    }
}
