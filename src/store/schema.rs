/// Default schema. Library identifiers are persisted as raw 16-byte blobs.
pub const SCHEMA: &str = r#"
-- Local users, mirrored from the upstream identity directory
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    external_uid INTEGER NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Libraries: named collections of document codes
CREATE TABLE IF NOT EXISTS libraries (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,

    -- If 1, anonymous read access allowed
    public INTEGER NOT NULL DEFAULT 0,

    -- Serialized JSON array; mutated only through the tracked list type
    bibcodes TEXT NOT NULL DEFAULT '[]',

    date_created TEXT NOT NULL,
    date_last_modified TEXT NOT NULL
);

-- One row per (user, library) pair; flag changes update the row in place.
-- Deletion cascades are issued explicitly by the store, so the bare
-- REFERENCES clauses make an incomplete cascade fail instead of orphaning.
CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    library_id BLOB NOT NULL REFERENCES libraries(id),
    read INTEGER NOT NULL DEFAULT 0,
    write INTEGER NOT NULL DEFAULT 0,
    admin INTEGER NOT NULL DEFAULT 0,
    owner INTEGER NOT NULL DEFAULT 0,

    UNIQUE (user_id, library_id)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_permissions_user ON permissions(user_id);
CREATE INDEX IF NOT EXISTS idx_permissions_library ON permissions(library_id);
"#;

/// Schema variant for deployments whose storage cannot hold raw 128-bit
/// keys; identifiers are persisted as 32-character lowercase hex strings.
pub const SCHEMA_HEX: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    external_uid INTEGER NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS libraries (
    id CHAR(32) PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    public INTEGER NOT NULL DEFAULT 0,
    bibcodes TEXT NOT NULL DEFAULT '[]',
    date_created TEXT NOT NULL,
    date_last_modified TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    library_id CHAR(32) NOT NULL REFERENCES libraries(id),
    read INTEGER NOT NULL DEFAULT 0,
    write INTEGER NOT NULL DEFAULT 0,
    admin INTEGER NOT NULL DEFAULT 0,
    owner INTEGER NOT NULL DEFAULT 0,

    UNIQUE (user_id, library_id)
);

CREATE INDEX IF NOT EXISTS idx_permissions_user ON permissions(user_id);
CREATE INDEX IF NOT EXISTS idx_permissions_library ON permissions(library_id);
"#;

/// Drops every table, destroying all stored data.
pub const DROP_SCHEMA: &str = r#"
DROP TABLE IF EXISTS permissions;
DROP TABLE IF EXISTS libraries;
DROP TABLE IF EXISTS users;
"#;
