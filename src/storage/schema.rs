//! Database schema definitions
//!
//! This module contains the SQL schema for the SQLite queue store.

/// SQL schema for the queue store
pub const SCHEMA_SQL: &str = r#"
-- Pending URIs, one logical queue per politeness key
CREATE TABLE IF NOT EXISTS pending (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    class_key TEXT NOT NULL,
    precedence INTEGER NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_order ON pending(class_key, precedence, seq);

-- Canonical URIs already scheduled
CREATE TABLE IF NOT EXISTS seen (
    canonical TEXT PRIMARY KEY
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
