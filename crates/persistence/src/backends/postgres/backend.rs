//! PostgreSQL backend implementation.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::backends::{BackendKind, RecordBackend};
use crate::error::{BackendError, RecordError, StorageError, StorageResult};
use crate::types::{BackendDescriptor, Post};

use super::schema;

const POST_COLUMNS: &str = "id, author_id, username, display_name, text, created_at, url, \
     hashtags, followers_count, following_count, retweet_count, reply_count, quote_count, \
     like_count, bookmark_count, view_count, verified, author_blue_verified, language, \
     conversation_id, author_location, author_description, profile_image_url, \
     cover_picture_url, media";

/// PostgreSQL backend serving one registered shard.
pub struct PostgresBackend {
    name: String,
    pool: Pool,
    config: PostgresConfig,
}

impl Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Configuration for the PostgreSQL backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL host.
    #[serde(default = "default_host")]
    pub host: String,

    /// PostgreSQL port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub dbname: String,

    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Statement timeout in milliseconds, applied to every pooled connection.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("statement_timeout_ms", &self.statement_timeout_ms)
            .finish_non_exhaustive()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_statement_timeout_ms() -> u64 {
    30000
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: "postgres".to_string(),
            user: default_user(),
            password: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl From<&BackendDescriptor> for PostgresConfig {
    fn from(descriptor: &BackendDescriptor) -> Self {
        Self {
            host: descriptor.host.clone(),
            port: descriptor.port,
            dbname: descriptor.database.clone(),
            user: descriptor.user.clone().unwrap_or_else(default_user),
            password: descriptor.password.clone(),
            max_connections: descriptor.max_connections,
            connect_timeout_secs: descriptor.connect_timeout_secs,
            statement_timeout_ms: descriptor.statement_timeout_ms,
        }
    }
}

impl PostgresBackend {
    /// Connects to the database a descriptor points at.
    pub async fn connect(descriptor: &BackendDescriptor) -> StorageResult<Self> {
        Self::new(descriptor.label(), PostgresConfig::from(descriptor)).await
    }

    /// Creates a pool and verifies connectivity.
    pub async fn new(name: impl Into<String>, config: PostgresConfig) -> StorageResult<Self> {
        let name = name.into();
        let pool = Self::create_pool(&name, &config)?;

        // Verify connectivity; the pool itself connects lazily.
        let client = pool.get().await.map_err(|e| {
            StorageError::Backend(BackendError::Unreachable {
                backend: name.clone(),
                message: e.to_string(),
            })
        })?;
        drop(client);

        tracing::debug!(backend = %name, host = %config.host, port = config.port, "Connected to PostgreSQL");

        Ok(Self { name, pool, config })
    }

    fn create_pool(name: &str, config: &PostgresConfig) -> StorageResult<Pool> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = config.password.clone();
        cfg.connect_timeout = Some(connect_timeout);
        // Sets statement_timeout on every new session.
        cfg.options = Some(format!("-c statement_timeout={}", config.statement_timeout_ms));

        let pool = cfg
            .builder(NoTls)
            .map_err(|e| {
                StorageError::Backend(BackendError::Internal {
                    backend: name.to_string(),
                    message: format!("Failed to create pool builder: {}", e),
                    source: None,
                })
            })?
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(connect_timeout))
            .create_timeout(Some(connect_timeout))
            .build()
            .map_err(|e| {
                StorageError::Backend(BackendError::Unreachable {
                    backend: name.to_string(),
                    message: e.to_string(),
                })
            })?;

        Ok(pool)
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    async fn get_client(&self) -> StorageResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(|e| {
            StorageError::Backend(BackendError::Unreachable {
                backend: self.name.clone(),
                message: e.to_string(),
            })
        })
    }

    fn classify(&self, e: tokio_postgres::Error) -> StorageError {
        if is_connection_error(&e) {
            return StorageError::Backend(BackendError::Unreachable {
                backend: self.name.clone(),
                message: e.to_string(),
            });
        }
        StorageError::Backend(BackendError::QueryFailed {
            backend: self.name.clone(),
            message: e.to_string(),
        })
    }

    /// Decoding failures are schema mismatches, never connectivity.
    fn rows_to_posts(&self, rows: Vec<Row>) -> StorageResult<Vec<Post>> {
        rows.iter()
            .map(row_to_post)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                StorageError::Backend(BackendError::Internal {
                    backend: self.name.clone(),
                    message: format!("Failed to decode post row: {}", e),
                    source: Some(Box::new(e)),
                })
            })
    }
}

/// Returns true if `e` means the server could not be reached or dropped the
/// connection. Failed statements and type conversion errors return false.
pub fn is_connection_error(e: &tokio_postgres::Error) -> bool {
    if e.is_closed() {
        return true;
    }
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return true;
        }
        source = cause.source();
    }
    false
}

fn row_to_post(row: &Row) -> Result<Post, tokio_postgres::Error> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(Post {
        id: row.try_get("id")?,
        author_id: row.try_get("author_id")?,
        username: row.try_get("username")?,
        display_name: row.try_get("display_name")?,
        text: row.try_get("text")?,
        created_at,
        url: row.try_get("url")?,
        hashtags: row.try_get("hashtags")?,
        followers_count: row.try_get("followers_count")?,
        following_count: row.try_get("following_count")?,
        retweet_count: row.try_get("retweet_count")?,
        reply_count: row.try_get("reply_count")?,
        quote_count: row.try_get("quote_count")?,
        like_count: row.try_get("like_count")?,
        bookmark_count: row.try_get("bookmark_count")?,
        view_count: row.try_get("view_count")?,
        verified: row.try_get("verified")?,
        author_blue_verified: row.try_get("author_blue_verified")?,
        language: row.try_get("language")?,
        conversation_id: row.try_get("conversation_id")?,
        author_location: row.try_get("author_location")?,
        author_description: row.try_get("author_description")?,
        profile_image_url: row.try_get("profile_image_url")?,
        cover_picture_url: row.try_get("cover_picture_url")?,
        media: row.try_get("media")?,
    })
}

#[async_trait]
impl RecordBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        let client = self.get_client().await?;
        schema::initialize_schema(&client, &self.name).await
    }

    async fn insert(&self, post: &Post) -> StorageResult<()> {
        let client = self.get_client().await?;
        let result = client
            .execute(
                "INSERT INTO posts (
                    id, author_id, username, display_name, text, created_at, url, hashtags,
                    followers_count, following_count, retweet_count, reply_count, quote_count,
                    like_count, bookmark_count, view_count, verified, author_blue_verified,
                    language, conversation_id, author_location, author_description,
                    profile_image_url, cover_picture_url, media
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                          $17, $18, $19, $20, $21, $22, $23, $24, $25)",
                &[
                    &post.id,
                    &post.author_id,
                    &post.username,
                    &post.display_name,
                    &post.text,
                    &post.created_at,
                    &post.url,
                    &post.hashtags,
                    &post.followers_count,
                    &post.following_count,
                    &post.retweet_count,
                    &post.reply_count,
                    &post.quote_count,
                    &post.like_count,
                    &post.bookmark_count,
                    &post.view_count,
                    &post.verified,
                    &post.author_blue_verified,
                    &post.language,
                    &post.conversation_id,
                    &post.author_location,
                    &post.author_description,
                    &post.profile_image_url,
                    &post.cover_picture_url,
                    &post.media,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(RecordError::DuplicateKey {
                    id: post.id.clone(),
                    backend: self.name.clone(),
                }
                .into())
            }
            Err(e) => Err(self.classify(e)),
        }
    }

    async fn search_text(&self, keyword: &str, limit: usize) -> StorageResult<Vec<Post>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let client = self.get_client().await?;
        let sql = format!(
            "SELECT {} FROM posts
             WHERE text_tsv @@ plainto_tsquery('english', $1)
             ORDER BY ts_rank(text_tsv, plainto_tsquery('english', $1)) DESC, created_at DESC
             LIMIT $2",
            POST_COLUMNS
        );
        let rows = client
            .query(&sql, &[&keyword, &(limit as i64)])
            .await
            .map_err(|e| self.classify(e))?;
        self.rows_to_posts(rows)
    }

    async fn database_size(&self) -> StorageResult<u64> {
        let client = self.get_client().await?;
        let row = client
            .query_one("SELECT pg_database_size(current_database())", &[])
            .await
            .map_err(|e| self.classify(e))?;
        let bytes: i64 = row.try_get(0)?;
        Ok(bytes.max(0) as u64)
    }

    async fn count(&self) -> StorageResult<u64> {
        let client = self.get_client().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM posts", &[])
            .await
            .map_err(|e| self.classify(e))?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn scan(&self, offset: usize, limit: usize) -> StorageResult<Vec<Post>> {
        let client = self.get_client().await?;
        let sql = format!(
            "SELECT {} FROM posts ORDER BY created_at, id LIMIT $1 OFFSET $2",
            POST_COLUMNS
        );
        let rows = client
            .query(&sql, &[&(limit as i64), &(offset as i64)])
            .await
            .map_err(|e| self.classify(e))?;
        self.rows_to_posts(rows)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let client = self.get_client().await?;
        client.query_one("SELECT 1", &[]).await.map_err(|e| {
            StorageError::Backend(BackendError::Unreachable {
                backend: self.name.clone(),
                message: e.to_string(),
            })
        })?;
        Ok(())
    }
}
