// Database schema — table creation and migrations (SQLite).
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements. UUIDs are stored as TEXT, JSON as TEXT.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent, so it runs on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            shortname TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            countries TEXT NOT NULL DEFAULT '',
            sequence_interval INTEGER,          -- seconds, overrides the default grouping gap
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS ecosystems (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            identifier TEXT NOT NULL,
            description TEXT,
            ecosystem_id TEXT REFERENCES ecosystems(id),
            project_id TEXT REFERENCES projects(id),
            metadata TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sampling_areas (
            id TEXT PRIMARY KEY,
            identifier TEXT,
            description TEXT,
            site_id TEXT NOT NULL REFERENCES sites(id),
            project_id TEXT REFERENCES projects(id),
            ecosystem_id TEXT REFERENCES ecosystems(id),
            radius_of_area REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            brand TEXT NOT NULL,
            serial_number TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS project_devices (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            device_id TEXT REFERENCES devices(id),
            device_type TEXT NOT NULL,
            project_serial_number TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (project_id, project_serial_number)
        );

        CREATE TABLE IF NOT EXISTS sampling_points (
            id TEXT PRIMARY KEY,
            identifier TEXT,
            project_id TEXT REFERENCES projects(id),
            site_id TEXT REFERENCES sites(id),
            sampling_area_id TEXT REFERENCES sampling_areas(id),
            device_id TEXT REFERENCES project_devices(id),
            ecosystem_id TEXT REFERENCES ecosystems(id),
            date_deployment TEXT,
            date_collected TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            file_metadata TEXT,                 -- JSON: EXIF and device metadata
            project_id TEXT NOT NULL REFERENCES projects(id),
            sampling_point_id TEXT REFERENCES sampling_points(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL DEFAULT '',
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            date_joined TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS observation_methods (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,                 -- 'machine' or 'human'
            description TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS pipeline_info (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            url_repo_model TEXT NOT NULL,
            execution_params TEXT NOT NULL,     -- JSON object
            comments TEXT NOT NULL,
            last_execution TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (name, version)
        );

        CREATE TABLE IF NOT EXISTS observation_geoms (
            id TEXT PRIMARY KEY,
            bbox TEXT NOT NULL,
            video_frame_num INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS observations (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id),
            project_id TEXT NOT NULL REFERENCES projects(id),
            pipeline_id TEXT REFERENCES pipeline_info(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            observation_method_id TEXT REFERENCES observation_methods(id),
            geom_id TEXT UNIQUE REFERENCES observation_geoms(id),
            observation_type TEXT,              -- 'animal', 'empty' or 'person'
            observation_tag TEXT,               -- JSON, e.g. {\"predicted_label\": \"small bird\"}
            taxon_id TEXT,
            score REAL,                         -- detector confidence
            confidence REAL,                    -- classifier confidence
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS processed_files (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id),
            pipeline_id TEXT NOT NULL REFERENCES pipeline_info(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (file_id, pipeline_id)
        );

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            identifier TEXT NOT NULL,
            event_type TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS events_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL REFERENCES events(id),
            file_id TEXT NOT NULL REFERENCES files(id),
            UNIQUE (event_id, file_id)
        );

        CREATE INDEX IF NOT EXISTS idx_files_url ON files(url);
        CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id);
        CREATE INDEX IF NOT EXISTS idx_sites_identifier ON sites(identifier);
        CREATE INDEX IF NOT EXISTS idx_observations_file ON observations(file_id);
        CREATE INDEX IF NOT EXISTS idx_observations_pipeline ON observations(pipeline_id);
        CREATE INDEX IF NOT EXISTS idx_events_files_file ON events_files(file_id);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: the methods table originally allowed duplicate names,
    // which made `observation_method_id` lookups ambiguous.
    run_migration(conn, 2, |c| {
        c.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_observation_methods_name
                 ON observation_methods(name);",
        )
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
