//! PostgreSQL schema for the posts table.

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Creates the posts table, the `tsvector` trigger and the indexes. Idempotent.
pub async fn initialize_schema(
    client: &deadpool_postgres::Client,
    backend: &str,
) -> StorageResult<()> {
    let pg_error = |what: &str, e: tokio_postgres::Error| {
        StorageError::Backend(BackendError::SchemaFailed {
            backend: backend.to_string(),
            message: format!("Failed to create {}: {}", what, e),
        })
    };

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
            &[],
        )
        .await
        .map_err(|e| pg_error("schema_version table", e))?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                username TEXT NOT NULL,
                display_name TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                url TEXT NOT NULL,
                hashtags TEXT[] NOT NULL DEFAULT '{}',
                followers_count BIGINT NOT NULL DEFAULT 0,
                following_count BIGINT NOT NULL DEFAULT 0,
                retweet_count BIGINT NOT NULL DEFAULT 0,
                reply_count BIGINT NOT NULL DEFAULT 0,
                quote_count BIGINT NOT NULL DEFAULT 0,
                like_count BIGINT NOT NULL DEFAULT 0,
                bookmark_count BIGINT NOT NULL DEFAULT 0,
                view_count BIGINT NOT NULL DEFAULT 0,
                verified BOOLEAN NOT NULL DEFAULT FALSE,
                author_blue_verified BOOLEAN NOT NULL DEFAULT FALSE,
                language TEXT,
                conversation_id TEXT,
                author_location TEXT,
                author_description TEXT,
                profile_image_url TEXT,
                cover_picture_url TEXT,
                media TEXT[] NOT NULL DEFAULT '{}',
                text_tsv TSVECTOR
            )",
            &[],
        )
        .await
        .map_err(|e| pg_error("posts table", e))?;

    client
        .execute(
            "CREATE OR REPLACE FUNCTION posts_text_tsv_update() RETURNS TRIGGER AS $$
            BEGIN
                NEW.text_tsv := to_tsvector('english', COALESCE(NEW.text, ''));
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql",
            &[],
        )
        .await
        .map_err(|e| pg_error("tsvector trigger function", e))?;

    // DROP first for idempotency
    client
        .execute("DROP TRIGGER IF EXISTS trg_posts_text_tsv ON posts", &[])
        .await
        .map_err(|e| pg_error("tsvector trigger", e))?;

    client
        .execute(
            "CREATE TRIGGER trg_posts_text_tsv
             BEFORE INSERT OR UPDATE OF text ON posts
             FOR EACH ROW EXECUTE FUNCTION posts_text_tsv_update()",
            &[],
        )
        .await
        .map_err(|e| pg_error("tsvector trigger", e))?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_posts_text_tsv ON posts USING GIN(text_tsv)",
        "CREATE INDEX IF NOT EXISTS idx_posts_username ON posts(username)",
        "CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC)",
    ];
    for sql in indexes {
        client
            .execute(sql, &[])
            .await
            .map_err(|e| pg_error("index", e))?;
    }

    let version = client
        .query_opt("SELECT version FROM schema_version LIMIT 1", &[])
        .await
        .map_err(|e| pg_error("schema_version row", e))?;
    if version.is_none() {
        client
            .execute(
                "INSERT INTO schema_version (version) VALUES ($1)",
                &[&SCHEMA_VERSION],
            )
            .await
            .map_err(|e| pg_error("schema_version row", e))?;
    }

    Ok(())
}
