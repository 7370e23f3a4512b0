// Database layer — SQLite or PostgreSQL storage for camera-trap media,
// observations, sequence events and pipeline registrations.
//
// We use rusqlite with the "bundled" feature so there's no system SQLite
// dependency. The database file lives wherever BALAM_DB_PATH points
// (defaults to ./balam.db). With the `postgres` feature and a postgres://
// DATABASE_URL, the shared catalogue database is used instead.

pub mod error;
pub mod models;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{is_duplicate, is_not_found, StoreError};
pub use traits::Database;

use anyhow::Result;
use std::sync::Arc;

#[cfg(feature = "sqlite")]
use anyhow::Context;
#[cfg(feature = "sqlite")]
use rusqlite::Connection;
#[cfg(feature = "sqlite")]
use std::path::Path;

/// Open (or create) a SQLite database and run migrations.
///
/// Called by `balam init`.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {db_path}"))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    // WAL for concurrent readers while a pipeline run writes
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

/// Open an existing SQLite database (fails if it doesn't exist yet).
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    if !Path::new(db_path).exists() {
        anyhow::bail!("Database not found at {db_path}. Run `balam init` first.");
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Picks up migrations added since the file was created
    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

/// An in-memory SQLite database with the full schema, plus a second raw
/// connection onto it for seeding fixtures.
#[cfg(feature = "sqlite")]
pub fn memory_sqlite() -> Result<(Arc<dyn Database>, Connection)> {
    let name = format!("file:balam-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
    let flags = rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
        | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
        | rusqlite::OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(&name, flags)?;
    schema::create_tables(&conn)?;
    let seed_conn = Connection::open_with_flags(&name, flags)?;
    seed_conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok((Arc::new(sqlite::SqliteDatabase::new(conn)), seed_conn))
}

/// Connect to PostgreSQL and run migrations.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(database_url: &str) -> Result<Arc<dyn Database>> {
    let db = postgres::PgDatabase::connect(database_url).await?;
    Ok(Arc::new(db))
}
