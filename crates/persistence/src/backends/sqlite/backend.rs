//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, Row, params};
use serde::{Deserialize, Serialize};

use crate::backends::{BackendKind, RecordBackend};
use crate::error::{BackendError, RecordError, StorageError, StorageResult};
use crate::types::{BackendDescriptor, Post};

use super::schema;

const POST_COLUMNS: &str = "p.id, p.author_id, p.username, p.display_name, p.text, p.created_at, \
     p.url, p.hashtags, p.followers_count, p.following_count, p.retweet_count, p.reply_count, \
     p.quote_count, p.like_count, p.bookmark_count, p.view_count, p.verified, \
     p.author_blue_verified, p.language, p.conversation_id, p.author_location, \
     p.author_description, p.profile_image_url, p.cover_picture_url, p.media";

/// SQLite backend serving one registered shard.
pub struct SqliteBackend {
    name: String,
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
    fts_enabled: AtomicBool,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

impl SqliteBackendConfig {
    /// Pool sizing taken from a registry descriptor.
    ///
    /// The busy timeout follows `statement_timeout_ms` but never exceeds the
    /// SQLite default, so a locked shard gives up well inside a search budget.
    pub fn from_descriptor(descriptor: &BackendDescriptor) -> Self {
        Self {
            max_connections: descriptor.max_connections.clamp(1, u32::MAX as usize) as u32,
            connection_timeout_ms: descriptor.connect_timeout_secs.saturating_mul(1000),
            busy_timeout_ms: descriptor
                .statement_timeout_ms
                .min(default_busy_timeout_ms() as u64) as u32,
            enable_wal: true,
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_config("sqlite:memory", ":memory:", SqliteBackendConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let name = format!("sqlite:{}", path.as_ref().display());
        Self::with_config(name, path, SqliteBackendConfig::default())
    }

    /// Opens the database a descriptor points at.
    pub fn from_descriptor(descriptor: &BackendDescriptor) -> StorageResult<Self> {
        Self::with_config(
            descriptor.label(),
            &descriptor.database,
            SqliteBackendConfig::from_descriptor(descriptor),
        )
    }

    /// Creates a backend with custom configuration.
    ///
    /// Opens the first connection, so call it from blocking context.
    pub fn with_config<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        let name = name.into();
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms as u64);
        let init = move |conn: &mut Connection| conn.busy_timeout(busy_timeout);

        // Every connection to ":memory:" opens a distinct database, so an
        // in-memory pool holds exactly one connection for its whole life.
        let (manager, builder) = if is_memory {
            (
                SqliteConnectionManager::memory().with_init(init),
                Pool::builder()
                    .max_size(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            )
        } else {
            (
                SqliteConnectionManager::file(path.as_ref()).with_init(init),
                Pool::builder().max_size(config.max_connections),
            )
        };

        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| unreachable(&name, e))?;

        let backend = Self {
            name,
            pool,
            config,
            is_memory,
            fts_enabled: AtomicBool::new(false),
        };

        backend.configure_connection()?;

        Ok(backend)
    }

    /// Enables WAL on file databases. The journal mode is stored in the file.
    fn configure_connection(&self) -> StorageResult<()> {
        if !self.config.enable_wal || self.is_memory {
            return Ok(());
        }
        let conn = checkout(&self.pool, &self.name)?;
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(|e| internal(&self.name, "Failed to enable WAL mode", e))
    }

    /// Runs `op` on a pooled connection on the blocking thread pool.
    ///
    /// Both the checkout and the query may block, so neither runs on the
    /// async executor; a caller's timeout stays effective while they wait.
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> StorageResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let conn = checkout(&pool, &name)?;
            op(&*conn, name.as_str())
        })
        .await
        .map_err(|e| {
            StorageError::Backend(BackendError::Internal {
                backend: self.name.clone(),
                message: format!("SQLite task failed: {}", e),
                source: Some(Box::new(e)),
            })
        })?
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns whether searches go through the FTS5 index.
    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled.load(Ordering::Acquire)
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }
}

fn checkout(
    pool: &Pool<SqliteConnectionManager>,
    name: &str,
) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
    pool.get().map_err(|e| unreachable(name, e))
}

fn unreachable(name: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(BackendError::Unreachable {
        backend: name.to_string(),
        message: e.to_string(),
    })
}

fn internal(name: &str, context: &str, e: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend: name.to_string(),
        message: format!("{}: {}", context, e),
        source: Some(Box::new(e)),
    })
}

fn query_failed(name: &str, e: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::QueryFailed {
        backend: name.to_string(),
        message: e.to_string(),
    })
}

fn search_fts(conn: &Connection, name: &str, keyword: &str, limit: usize) -> StorageResult<Vec<Post>> {
    let query = fts_query(keyword);
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM posts_fts
         JOIN posts p ON p.row_id = posts_fts.rowid
         WHERE posts_fts MATCH ?1
         ORDER BY bm25(posts_fts), p.created_at DESC
         LIMIT ?2",
        POST_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| query_failed(name, e))?;
    let rows = stmt
        .query_map(params![query, limit as i64], row_to_post)
        .map_err(|e| query_failed(name, e))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| query_failed(name, e))
}

fn search_like(conn: &Connection, name: &str, keyword: &str, limit: usize) -> StorageResult<Vec<Post>> {
    let terms = like_terms(keyword);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let predicates: Vec<String> = (1..=terms.len())
        .map(|i| format!("lower(p.text) LIKE ?{} ESCAPE '\\'", i))
        .collect();
    let sql = format!(
        "SELECT {} FROM posts p WHERE {} ORDER BY p.created_at DESC LIMIT {}",
        POST_COLUMNS,
        predicates.join(" AND "),
        limit
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| query_failed(name, e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(terms.iter()), row_to_post)
        .map_err(|e| query_failed(name, e))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| query_failed(name, e))
}

/// Strips FTS5 operators and quotes each remaining term.
///
/// Terms are implicitly AND-ed by FTS5.
pub(crate) fn fts_query(keyword: &str) -> String {
    let mut cleaned = keyword.to_string();
    for c in ['"', '*', ':', '^', '(', ')', '+', '-', '~', '\''] {
        cleaned = cleaned.replace(c, " ");
    }
    cleaned
        .split_whitespace()
        .map(|term| format!("\"{}\"", term))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `%term%` patterns with LIKE wildcards escaped.
fn like_terms(keyword: &str) -> Vec<String> {
    keyword
        .split_whitespace()
        .map(|term| {
            let escaped = term
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{}%", escaped)
        })
        .collect()
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let created_at: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Post {
        id: row.get(0)?,
        author_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        text: row.get(4)?,
        created_at,
        url: row.get(6)?,
        hashtags: json_column(row, 7)?,
        followers_count: row.get(8)?,
        following_count: row.get(9)?,
        retweet_count: row.get(10)?,
        reply_count: row.get(11)?,
        quote_count: row.get(12)?,
        like_count: row.get(13)?,
        bookmark_count: row.get(14)?,
        view_count: row.get(15)?,
        verified: row.get(16)?,
        author_blue_verified: row.get(17)?,
        language: row.get(18)?,
        conversation_id: row.get(19)?,
        author_location: row.get(20)?,
        author_description: row.get(21)?,
        profile_image_url: row.get(22)?,
        cover_picture_url: row.get(23)?,
        media: json_column(row, 24)?,
    })
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        let fts = self
            .blocking(|conn, name| schema::initialize_schema(conn, name))
            .await?;
        self.fts_enabled.store(fts, Ordering::Release);
        tracing::debug!(backend = %self.name, fts, "SQLite schema ready");
        Ok(())
    }

    async fn insert(&self, post: &Post) -> StorageResult<()> {
        let post = post.clone();
        self.blocking(move |conn, name| insert_post(conn, name, &post))
            .await
    }

    async fn search_text(&self, keyword: &str, limit: usize) -> StorageResult<Vec<Post>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keyword = keyword.to_string();
        if self.fts_enabled() {
            self.blocking(move |conn, name| search_fts(conn, name, &keyword, limit))
                .await
        } else {
            self.blocking(move |conn, name| search_like(conn, name, &keyword, limit))
                .await
        }
    }

    async fn database_size(&self) -> StorageResult<u64> {
        self.blocking(|conn, name| {
            let bytes: i64 = conn
                .query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| query_failed(name, e))?;
            Ok(bytes.max(0) as u64)
        })
        .await
    }

    async fn count(&self) -> StorageResult<u64> {
        self.blocking(|conn, name| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
                .map_err(|e| query_failed(name, e))?;
            Ok(count as u64)
        })
        .await
    }

    async fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<Post>> {
        self.blocking(move |conn, name| {
            let sql = format!(
                "SELECT {} FROM posts p ORDER BY p.created_at, p.id LIMIT ?1 OFFSET ?2",
                POST_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(|e| query_failed(name, e))?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], row_to_post)
                .map_err(|e| query_failed(name, e))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| query_failed(name, e))
        })
        .await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.blocking(|conn, name| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| unreachable(name, e))
        })
        .await
    }
}

fn insert_post(conn: &Connection, name: &str, post: &Post) -> StorageResult<()> {
    let hashtags = serde_json::to_string(&post.hashtags)?;
    let media = serde_json::to_string(&post.media)?;

    let result = conn.execute(
        "INSERT INTO posts (
            id, author_id, username, display_name, text, created_at, url, hashtags,
            followers_count, following_count, retweet_count, reply_count, quote_count,
            like_count, bookmark_count, view_count, verified, author_blue_verified,
            language, conversation_id, author_location, author_description,
            profile_image_url, cover_picture_url, media
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            post.id,
            post.author_id,
            post.username,
            post.display_name,
            post.text,
            format_timestamp(&post.created_at),
            post.url,
            hashtags,
            post.followers_count,
            post.following_count,
            post.retweet_count,
            post.reply_count,
            post.quote_count,
            post.like_count,
            post.bookmark_count,
            post.view_count,
            post.verified,
            post.author_blue_verified,
            post.language,
            post.conversation_id,
            post.author_location,
            post.author_description,
            post.profile_image_url,
            post.cover_picture_url,
            media,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(RecordError::DuplicateKey {
                id: post.id.clone(),
                backend: name.to_string(),
            }
            .into())
        }
        Err(e) => Err(query_failed(name, e)),
    }
}
