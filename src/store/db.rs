// Sigvault — SQLite Database Management
//
// Opens the durable record database and runs schema migrations. Everything
// secret that lands here is already AEAD ciphertext, so the file itself is
// plain SQLite.

use rusqlite::Connection;

use super::StoreError;

/// Wrapper around the SQLite connection backing the durable store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Fail fast on a file that is not a database
        conn.execute_batch("SELECT count(*) FROM sqlite_master;")?;

        let db = Self { conn };
        db.run_migrations()?;

        tracing::debug!(path = %path.display(), "Durable store opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing only).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a reference to the underlying connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run schema migrations to create or update tables.
    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_records (
                collection  TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       BLOB NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            );

            CREATE INDEX IF NOT EXISTS idx_kv_records_collection
                ON kv_records(collection);
            ",
        )?;

        tracing::debug!("Database migrations completed successfully");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
