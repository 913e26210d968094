//! Database schema and migrations for Cumulus.
//!
//! Migrations are applied in order the first time a database is opened or
//! upgraded; `schema_version` records which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Storage containers (one per user)
    r#"
CREATE TABLE storages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL UNIQUE,
    bucket_name     TEXT NOT NULL,
    max_size        INTEGER NOT NULL,
    current_size    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    // v2: Content-addressed blobs
    r#"
CREATE TABLE blobs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    hash        TEXT NOT NULL,
    name        TEXT NOT NULL,
    bucket      TEXT NOT NULL,
    object_key  TEXT NOT NULL,
    size        INTEGER NOT NULL,
    ref_count   INTEGER NOT NULL DEFAULT 0 CHECK (ref_count >= 0),
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (hash, size)
);
"#,
    // v3: File tree nodes
    r#"
CREATE TABLE files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_id  INTEGER NOT NULL REFERENCES storages(id) ON DELETE CASCADE,
    father_id   INTEGER NOT NULL DEFAULT 0,     -- 0 = storage root
    name        TEXT NOT NULL,
    file_type   INTEGER NOT NULL,
    blob_id     INTEGER REFERENCES blobs(id) ON DELETE SET NULL,  -- NULL for folders
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    deleted_at  TEXT
);

CREATE INDEX idx_files_storage_father ON files(storage_id, father_id);
CREATE UNIQUE INDEX idx_files_live_name ON files(storage_id, father_id, name)
    WHERE deleted_at IS NULL;
"#,
    // v4: Per-type statistics and listing
    r#"
CREATE INDEX idx_files_storage_type ON files(storage_id, file_type);
CREATE INDEX idx_files_blob ON files(blob_id);
"#,
];
