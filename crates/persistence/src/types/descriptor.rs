//! Backend descriptors: one registered database instance each.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::BackendKind;

/// Connection coordinates and pool sizing for one registered backend.
///
/// Descriptors are immutable once registered, except for `exhausted`, which
/// flips from false to true exactly once when the backend is retired by a
/// rollover.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Ordinal position in the registry. Equals the index in the list.
    pub id: usize,

    /// Which driver serves this descriptor.
    #[serde(default)]
    pub kind: BackendKind,

    /// Database host (PostgreSQL only).
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port (PostgreSQL only).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name. For SQLite this is the file path (or `:memory:`).
    pub database: String,

    /// Database user.
    #[serde(default)]
    pub user: Option<String>,

    /// Database password.
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    /// Set once the backend reached the size ceiling and was retired.
    #[serde(default)]
    pub exhausted: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
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

impl BackendDescriptor {
    /// Creates a descriptor with default coordinates and pool sizing.
    pub fn new(id: usize, kind: BackendKind, database: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            host: default_host(),
            port: default_port(),
            database: database.into(),
            user: None,
            password: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            statement_timeout_ms: default_statement_timeout_ms(),
            exhausted: false,
        }
    }

    /// Descriptor for a PostgreSQL database.
    pub fn postgres(
        id: usize,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::new(id, BackendKind::Postgres, database)
        }
    }

    /// Descriptor for a SQLite database file (or `:memory:`).
    pub fn sqlite(id: usize, path: impl Into<String>) -> Self {
        Self::new(id, BackendKind::Sqlite, path)
    }

    /// Descriptor for a process-local in-memory backend.
    pub fn memory(id: usize, name: impl Into<String>) -> Self {
        Self::new(id, BackendKind::Memory, name)
    }

    /// Sets the credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = Some(user.into());
        self.password = password;
        self
    }

    /// Connection timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Short label used in logs and error messages, e.g. `postgres#1:posts_1`.
    pub fn label(&self) -> String {
        format!("{}#{}:{}", self.kind, self.id, self.database)
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_from_json() {
        let json = r#"{"id": 0, "database": "posts_0"}"#;
        let d: BackendDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.kind, BackendKind::Postgres);
        assert_eq!(d.host, "localhost");
        assert_eq!(d.port, 5432);
        assert_eq!(d.max_connections, 10);
        assert_eq!(d.connect_timeout_secs, 5);
        assert_eq!(d.statement_timeout_ms, 30000);
        assert!(!d.exhausted);
    }

    #[test]
    fn test_debug_redacts_password() {
        let d = BackendDescriptor::postgres(1, "db.internal", 5433, "posts_1")
            .with_credentials("writer", Some("hunter2".to_string()));
        let rendered = format!("{:?}", d);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_label() {
        assert_eq!(BackendDescriptor::memory(2, "shard").label(), "memory#2:shard");
    }
}
