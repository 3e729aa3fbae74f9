//! SQLite schema for the posts table.

use rusqlite::Connection;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Creates the posts table, its indexes and, when available, the FTS5 index.
///
/// Idempotent. Returns whether full-text search through FTS5 is active.
pub fn initialize_schema(conn: &Connection, backend: &str) -> StorageResult<bool> {
    let schema_err = |what: &str, e: rusqlite::Error| {
        StorageError::Backend(BackendError::SchemaFailed {
            backend: backend.to_string(),
            message: format!("Failed to create {}: {}", what, e),
        })
    };

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS posts (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            author_id TEXT NOT NULL,
            username TEXT NOT NULL,
            display_name TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            url TEXT NOT NULL,
            hashtags TEXT NOT NULL DEFAULT '[]',
            followers_count INTEGER NOT NULL DEFAULT 0,
            following_count INTEGER NOT NULL DEFAULT 0,
            retweet_count INTEGER NOT NULL DEFAULT 0,
            reply_count INTEGER NOT NULL DEFAULT 0,
            quote_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            bookmark_count INTEGER NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            verified INTEGER NOT NULL DEFAULT 0,
            author_blue_verified INTEGER NOT NULL DEFAULT 0,
            language TEXT,
            conversation_id TEXT,
            author_location TEXT,
            author_description TEXT,
            profile_image_url TEXT,
            cover_picture_url TEXT,
            media TEXT NOT NULL DEFAULT '[]'
        );",
    )
    .map_err(|e| schema_err("posts table", e))?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_posts_username ON posts(username)",
        "CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC)",
    ];
    for sql in indexes {
        conn.execute(sql, []).map_err(|e| schema_err("index", e))?;
    }

    let fts_enabled = is_fts5_available(conn);
    if fts_enabled {
        create_fts_index(conn).map_err(|e| schema_err("posts_fts", e))?;
    } else {
        tracing::warn!(backend, "FTS5 not compiled in, falling back to LIKE matching");
    }

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();
    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )
        .map_err(|e| schema_err("schema_version", e))?;
    }

    Ok(fts_enabled)
}

/// Returns true if this SQLite build includes FTS5.
pub fn is_fts5_available(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT sqlite_compileoption_used('ENABLE_FTS5')",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|v| v == 1)
    .unwrap_or(false)
}

/// External-content FTS5 table over `posts.text`, kept in sync by triggers.
fn create_fts_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
            text,
            content='posts',
            content_rowid='row_id',
            tokenize='porter unicode61'
        );

        CREATE TRIGGER IF NOT EXISTS posts_fts_insert AFTER INSERT ON posts BEGIN
            INSERT INTO posts_fts(rowid, text) VALUES (new.row_id, new.text);
        END;

        CREATE TRIGGER IF NOT EXISTS posts_fts_delete AFTER DELETE ON posts BEGIN
            INSERT INTO posts_fts(posts_fts, rowid, text) VALUES ('delete', old.row_id, old.text);
        END;

        CREATE TRIGGER IF NOT EXISTS posts_fts_update AFTER UPDATE OF text ON posts BEGIN
            INSERT INTO posts_fts(posts_fts, rowid, text) VALUES ('delete', old.row_id, old.text);
            INSERT INTO posts_fts(rowid, text) VALUES (new.row_id, new.text);
        END;",
    )
}
