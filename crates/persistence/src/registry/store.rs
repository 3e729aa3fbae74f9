//! Durable storage for the registry.
//!
//! Saving happens inside the rollover critical section, so stores are
//! synchronous.

use std::fmt::Debug;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::RegistryConfig;
use crate::error::RegistryError;

use super::RegistryState;

/// Loads and saves [`RegistryState`].
pub trait RegistryStore: Send + Sync + Debug {
    /// Reads and validates the stored registry.
    fn load(&self) -> Result<RegistryState, RegistryError>;

    /// Durably replaces the stored registry. Returns only once the new
    /// state survives a process crash or power loss.
    fn save(&self, state: &RegistryState) -> Result<(), RegistryError>;
}

/// Registry kept in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileRegistryStore {
    path: PathBuf,
}

impl JsonFileRegistryStore {
    /// Uses the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "registry.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Directory holding the registry file; `.` for a bare file name.
    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Flushes the directory entry created by the rename.
    #[cfg(unix)]
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        File::open(self.parent_dir())?.sync_all()
    }

    /// Directories cannot be opened for syncing here; the rename is final.
    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        Ok(())
    }

    fn persist_err(&self, message: impl ToString) -> RegistryError {
        RegistryError::Persist {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }

    fn load_err(&self, message: impl ToString) -> RegistryError {
        RegistryError::Load {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }
}

impl RegistryStore for JsonFileRegistryStore {
    fn load(&self) -> Result<RegistryState, RegistryError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| self.load_err(e))?;
        let config: RegistryConfig = serde_json::from_str(&raw).map_err(|e| self.load_err(e))?;
        RegistryState::from_config(config)
    }

    fn save(&self, state: &RegistryState) -> Result<(), RegistryError> {
        let body =
            serde_json::to_vec_pretty(&state.to_config()).map_err(|e| self.persist_err(e))?;

        // Write a sibling file, flush it to disk, then rename over the target.
        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|e| self.persist_err(e))?;
        file.write_all(&body).map_err(|e| self.persist_err(e))?;
        file.sync_all().map_err(|e| self.persist_err(e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            self.persist_err(e)
        })?;
        self.sync_parent_dir().map_err(|e| self.persist_err(e))?;

        tracing::debug!(
            path = %self.path.display(),
            current_index = state.current_index(),
            "Registry saved"
        );
        Ok(())
    }
}

/// Registry kept in memory, with switchable save failures for tests.
#[derive(Debug)]
pub struct InMemoryRegistryStore {
    saved: Mutex<Option<RegistryConfig>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryRegistryStore {
    /// Creates a store holding `state`.
    pub fn new(state: &RegistryState) -> Self {
        Self {
            saved: Mutex::new(Some(state.to_config())),
            fail_saves: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// Creates a store holding nothing; `load` fails until a save succeeds.
    pub fn empty() -> Self {
        Self {
            saved: Mutex::new(None),
            fail_saves: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// Makes every following `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The last saved registry contents.
    pub fn saved(&self) -> Option<RegistryConfig> {
        self.saved.lock().clone()
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn load(&self) -> Result<RegistryState, RegistryError> {
        let config = self.saved.lock().clone().ok_or_else(|| RegistryError::Load {
            path: "memory".to_string(),
            message: "no registry saved".to_string(),
        })?;
        RegistryState::from_config(config)
    }

    fn save(&self, state: &RegistryState) -> Result<(), RegistryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RegistryError::Persist {
                path: "memory".to_string(),
                message: "saves are switched off".to_string(),
            });
        }
        *self.saved.lock() = Some(state.to_config());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
