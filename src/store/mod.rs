// Sigvault — Store Module
//
// `KeyValueStore` capability (get/put/delete by collection + key, plus atomic
// batches) with two injected implementations: a durable SQLite store for
// envelopes and persisted signer records, and a session store that lives only
// as long as the process.

mod db;
mod error;
mod repository;
mod session;

pub use db::Database;
pub use error::StoreError;
pub use repository::{KeyValueStore, KeyValueStoreExt, SqliteKeyValueStore, StoreOp};
pub use session::SessionStore;
