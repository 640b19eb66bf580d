// Sigvault — Session Store
//
// Process-lifetime store for ephemeral signer records. Nothing here survives a
// restart, which is exactly the lifetime of an ephemeral signer's key.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::repository::{KeyValueStore, StoreOp};
use super::StoreError;

/// In-memory `KeyValueStore`, cleared when dropped.
#[derive(Default)]
pub struct SessionStore {
    records: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record (end of session).
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.clear();
        Ok(())
    }
}

impl KeyValueStore for SessionStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert((collection.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .remove(&(collection.to_string(), key.to_string()))
            .is_some())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: &[StoreOp]) -> Result<(), StoreError> {
        // One lock for the whole batch makes it atomic to every reader
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        for op in batch {
            match op {
                StoreOp::Put {
                    collection,
                    key,
                    value,
                } => {
                    records.insert((collection.clone(), key.clone()), value.clone());
                }
                StoreOp::Delete { collection, key } => {
                    records.remove(&(collection.clone(), key.clone()));
                }
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
