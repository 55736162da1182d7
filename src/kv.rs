use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::EngineResult;

/// Atomic key-value capability required by the side-effect guard.
///
/// `set_if_absent` must have compare-and-swap semantics - it succeeds only
/// when the key is absent, atomically with respect to every other writer -
/// not merely last-write-wins. Any transactional key-value or row-locking
/// store satisfies this.
#[async_trait]
pub trait AtomicKvStore: Send + Sync {
    /// Set the key only when absent. Returns `true` when this call created
    /// the entry, `false` when another writer got there first.
    async fn set_if_absent(&self, key: &str, value: &str) -> EngineResult<bool>;

    /// Set the key unconditionally
    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;

    /// Read the current value, if any
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;
}

/// In-memory store for tests and development
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomicKvStore for MemoryKvStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> EngineResult<bool> {
        let mut entries = self.entries.write();
        match entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }
}
