// Sigvault — Key-Value Store Repository
//
// The storage capability every other module is written against. Records are
// opaque bytes addressed by (collection, key); callers that need structure go
// through the JSON helpers on `KeyValueStoreExt`. `apply()` commits a batch of
// puts and deletes all-or-nothing, which is what keeps an envelope and its
// signer record from ever existing without each other.

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::Database;
use super::StoreError;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put {
        collection: String,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        collection: String,
        key: String,
    },
}

impl StoreOp {
    /// Build a put of a JSON-serialized record.
    pub fn put_json<T: Serialize>(
        collection: &str,
        key: &str,
        record: &T,
    ) -> Result<Self, StoreError> {
        Ok(Self::Put {
            collection: collection.to_string(),
            key: key.to_string(),
            value: serde_json::to_vec(record)?,
        })
    }

    pub fn delete(collection: &str, key: &str) -> Self {
        Self::Delete {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }
}

/// Abstraction over record storage, injected as durable or session-scoped.
pub trait KeyValueStore: Send + Sync {
    /// Fetch a record, or `None` if absent.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite a record.
    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a record. Returns true if it existed.
    fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError>;

    /// All records of a collection, ordered by key.
    fn list(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Apply every operation or none of them.
    fn apply(&self, batch: &[StoreOp]) -> Result<(), StoreError>;
}

/// Typed JSON access on top of any `KeyValueStore`.
pub trait KeyValueStoreExt: KeyValueStore {
    fn get_json<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(collection, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.put(collection, key, &bytes)
    }

    fn list_json<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        self.list(collection)?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .collect()
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

// ─── SQLite Implementation ──────────────────────────────────────────────────

/// Durable store backed by a single SQLite table.
pub struct SqliteKeyValueStore {
    db: Mutex<Database>,
}

impl SqliteKeyValueStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Durable store over an in-memory database (for testing only).
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Database::open_in_memory().unwrap())
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db
                .conn()
                .prepare("SELECT value FROM kv_records WHERE collection = ?1 AND key = ?2")?;

            let mut rows =
                stmt.query_map(params![collection, key], |row| row.get::<_, Vec<u8>>(0))?;

            match rows.next() {
                Some(Ok(value)) => Ok(Some(value)),
                Some(Err(e)) => Err(StoreError::Database(e)),
                None => Ok(None),
            }
        })
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.apply(&[StoreOp::Put {
            collection: collection.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
        }])
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        self.with_db(|db| {
            let affected = db.conn().execute(
                "DELETE FROM kv_records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )?;
            Ok(affected > 0)
        })
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.with_db(|db| {
            let mut stmt = db.conn().prepare(
                "SELECT key, value FROM kv_records WHERE collection = ?1 ORDER BY key ASC",
            )?;

            let rows = stmt.query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?;

            let mut records: Vec<(String, Vec<u8>)> = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    fn apply(&self, batch: &[StoreOp]) -> Result<(), StoreError> {
        self.with_db(|db| {
            let now = Utc::now().to_rfc3339();
            let tx = db.conn().unchecked_transaction()?;

            for op in batch {
                match op {
                    StoreOp::Put {
                        collection,
                        key,
                        value,
                    } => {
                        tx.execute(
                            "INSERT INTO kv_records (collection, key, value, updated_at)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(collection, key)
                             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                            params![collection, key, value, now],
                        )?;
                    }
                    StoreOp::Delete { collection, key } => {
                        tx.execute(
                            "DELETE FROM kv_records WHERE collection = ?1 AND key = ?2",
                            params![collection, key],
                        )?;
                    }
                }
            }

            // Dropping an uncommitted transaction rolls it back
            tx.commit()?;

            tracing::debug!(ops = batch.len(), "Store batch committed");
            Ok(())
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_put_then_get_returns_value() {
        let store = SqliteKeyValueStore::in_memory();
        store.put("signers", "a", b"alpha").unwrap();

        let value = store.get("signers", "a").unwrap();
        assert_eq!(value.as_deref(), Some(b"alpha".as_slice()));
    }

    #[test]
    fn test_get_nonexistent_returns_none() {
        let store = SqliteKeyValueStore::in_memory();
        assert!(store.get("signers", "missing").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites_existing_record() {
        let store = SqliteKeyValueStore::in_memory();
        store.put("envelopes", "id", b"first").unwrap();
        store.put("envelopes", "id", b"second").unwrap();

        assert_eq!(
            store.get("envelopes", "id").unwrap().as_deref(),
            Some(b"second".as_slice())
        );
        assert_eq!(store.list("envelopes").unwrap().len(), 1);
    }

    #[test]
    fn test_collections_are_isolated() {
        let store = SqliteKeyValueStore::in_memory();
        store.put("signers", "k", b"1").unwrap();
        store.put("envelopes", "k", b"2").unwrap();

        assert_eq!(store.list("signers").unwrap().len(), 1);
        assert!(store.delete("signers", "k").unwrap());
        assert!(
            store.get("envelopes", "k").unwrap().is_some(),
            "Deleting in one collection must not touch another"
        );
    }

    #[test]
    fn test_delete_nonexistent_returns_false() {
        let store = SqliteKeyValueStore::in_memory();
        assert!(!store.delete("signers", "missing").unwrap());
    }

    #[test]
    fn test_list_is_ordered_by_key() {
        let store = SqliteKeyValueStore::in_memory();
        for key in ["c", "a", "b"] {
            store.put("signers", key, key.as_bytes()).unwrap();
        }
        let keys: Vec<String> = store
            .list("signers")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_apply_commits_puts_and_deletes_together() {
        let store = SqliteKeyValueStore::in_memory();
        store.put("signers", "old", b"x").unwrap();

        store
            .apply(&[
                StoreOp::Put {
                    collection: "envelopes".into(),
                    key: "id".into(),
                    value: b"sealed".to_vec(),
                },
                StoreOp::delete("signers", "old"),
            ])
            .unwrap();

        assert!(store.get("envelopes", "id").unwrap().is_some());
        assert!(store.get("signers", "old").unwrap().is_none());
    }

    #[test]
    fn test_failed_batch_leaves_no_partial_write() {
        let store = SqliteKeyValueStore::in_memory();
        store
            .with_db(|db| {
                db.conn().execute_batch(
                    "CREATE TRIGGER reject_poison BEFORE INSERT ON kv_records
                     WHEN NEW.key = 'poison'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let result = store.apply(&[
            StoreOp::Put {
                collection: "envelopes".into(),
                key: "good".into(),
                value: b"1".to_vec(),
            },
            StoreOp::Put {
                collection: "signers".into(),
                key: "poison".into(),
                value: b"2".to_vec(),
            },
        ]);

        assert!(result.is_err(), "Batch containing a rejected write must fail");
        assert!(
            store.get("envelopes", "good").unwrap().is_none(),
            "Earlier writes in a failed batch must be rolled back"
        );
    }

    #[test]
    fn test_json_helpers_round_trip() {
        let store = SqliteKeyValueStore::in_memory();
        let sample = Sample {
            name: "alice".into(),
            count: 3,
        };
        store.put_json("signers", "alice", &sample).unwrap();

        let loaded: Option<Sample> = store.get_json("signers", "alice").unwrap();
        assert_eq!(loaded, Some(sample));

        let all: Vec<Sample> = store.list_json("signers").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_corrupt_json_surfaces_error() {
        let store = SqliteKeyValueStore::in_memory();
        store.put("signers", "bad", b"{not json").unwrap();
        let result: Result<Option<Sample>, _> = store.get_json("signers", "bad");
        assert!(matches!(result, Err(StoreError::Json(_))));
    }
}
