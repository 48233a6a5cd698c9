//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS branches (
            id                      TEXT PRIMARY KEY,
            suite_id                TEXT    NOT NULL,
            name                    TEXT    NOT NULL,
            parent_branch_id        TEXT REFERENCES branches (id),
            is_default              INTEGER NOT NULL DEFAULT 0,
            status                  TEXT    NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'merged', 'closed', 'archived')),
            forked_from_snapshot_id TEXT,
            head_snapshot_id        TEXT,
            created_at              TEXT    NOT NULL,
            UNIQUE (suite_id, name)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_branches_one_default
            ON branches (suite_id) WHERE is_default = 1;
        CREATE INDEX IF NOT EXISTS idx_branches_parent ON branches (parent_branch_id);

        CREATE TABLE IF NOT EXISTS snapshots (
            seq           INTEGER PRIMARY KEY AUTOINCREMENT,
            id            TEXT    NOT NULL UNIQUE,
            branch_id     TEXT    NOT NULL REFERENCES branches (id) ON DELETE CASCADE,
            captured_at   TEXT    NOT NULL,
            content_hash  TEXT    NOT NULL,
            code_files    TEXT    NOT NULL,
            scenarios     TEXT    NOT NULL,
            config        TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_snapshots_branch ON snapshots (branch_id, seq);

        CREATE TABLE IF NOT EXISTS merge_requests (
            id                      TEXT PRIMARY KEY,
            source_branch_id        TEXT NOT NULL,
            target_branch_id        TEXT NOT NULL,
            base_snapshot_id        TEXT NOT NULL,
            source_head_snapshot_id TEXT NOT NULL,
            target_head_snapshot_id TEXT NOT NULL,
            status                  TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'conflict', 'merged', 'closed')),
            created_by              TEXT NOT NULL,
            created_at              TEXT NOT NULL,
            merged_at               TEXT,
            merged_snapshot_id      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_merge_requests_source ON merge_requests (source_branch_id);
        CREATE INDEX IF NOT EXISTS idx_merge_requests_target ON merge_requests (target_branch_id);
        CREATE INDEX IF NOT EXISTS idx_merge_requests_status ON merge_requests (status);

        CREATE TABLE IF NOT EXISTS merge_conflicts (
            id                 TEXT PRIMARY KEY,
            merge_request_id   TEXT NOT NULL REFERENCES merge_requests (id) ON DELETE CASCADE,
            ordinal            INTEGER NOT NULL,
            path               TEXT NOT NULL,
            key_path           TEXT,
            kind               TEXT NOT NULL CHECK (kind IN ('code', 'config', 'scenario')),
            base_value         TEXT,
            source_value       TEXT,
            target_value       TEXT,
            resolution_status  TEXT NOT NULL DEFAULT 'pending'
                CHECK (resolution_status IN ('pending', 'resolved')),
            created_at         TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_merge_conflicts_request
            ON merge_conflicts (merge_request_id, ordinal);

        CREATE TABLE IF NOT EXISTS conflict_resolutions (
            id              TEXT PRIMARY KEY,
            conflict_id     TEXT NOT NULL UNIQUE REFERENCES merge_conflicts (id) ON DELETE CASCADE,
            strategy        TEXT NOT NULL CHECK (strategy IN ('source', 'target', 'both', 'custom')),
            resolved_value  TEXT,
            resolved_by     TEXT NOT NULL,
            resolved_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS merge_history (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            merge_request_id  TEXT NOT NULL,
            action            TEXT NOT NULL
                CHECK (action IN ('created', 'conflict_detected', 'resolved', 'merged', 'closed')),
            actor             TEXT NOT NULL,
            timestamp         TEXT NOT NULL,
            detail            TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_merge_history_request ON merge_history (merge_request_id);

        CREATE TRIGGER IF NOT EXISTS merge_history_no_update
            BEFORE UPDATE ON merge_history
            BEGIN SELECT RAISE(ABORT, 'merge_history is append-only'); END;

        CREATE TRIGGER IF NOT EXISTS merge_history_no_delete
            BEFORE DELETE ON merge_history
            BEGIN SELECT RAISE(ABORT, 'merge_history is append-only'); END;
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
