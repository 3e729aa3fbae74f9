//! The database registry.
//!
//! [`RegistryState`] is the ordered list of backend descriptors together
//! with the index of the active (write target) backend and the size ceiling
//! shared by all of them. Only the rollover controller mutates it; every
//! mutation produces a successor value that is persisted through a
//! [`RegistryStore`] before it replaces the in-memory state.
//!
//! Invariants, checked on load:
//!
//! - descriptor ids equal their positions;
//! - `current_index <= descriptors.len()` (equality means every backend is
//!   exhausted);
//! - every descriptor below `current_index` is exhausted and none at or
//!   above it is, so the active backend is always the lowest-ordinal
//!   non-exhausted one.

mod store;

pub use store::{InMemoryRegistryStore, JsonFileRegistryStore, RegistryStore};

use regex::Regex;

use crate::backends::BackendKind;
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::types::BackendDescriptor;

/// PostgreSQL identifiers: letters, digits, `_`, `$` and `-`, at most 63 bytes.
const POSTGRES_DATABASE_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_$-]{0,62}$";

/// Where writes currently go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Writes go to the descriptor with this ordinal.
    Active(usize),
    /// Every descriptor is exhausted; writes fail with `CapacityExhausted`.
    Exhausted,
}

impl Phase {
    /// The active ordinal, if any.
    pub fn active_index(&self) -> Option<usize> {
        match self {
            Phase::Active(i) => Some(*i),
            Phase::Exhausted => None,
        }
    }
}

/// Validated registry contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryState {
    descriptors: Vec<BackendDescriptor>,
    current_index: usize,
    size_limit_bytes: u64,
}

impl RegistryState {
    /// Creates a fresh registry where the first descriptor is active.
    pub fn new(
        size_limit_bytes: u64,
        descriptors: Vec<BackendDescriptor>,
    ) -> Result<Self, RegistryError> {
        Self::from_config(RegistryConfig::new(size_limit_bytes, descriptors))
    }

    /// Validates a loaded registry file.
    pub fn from_config(config: RegistryConfig) -> Result<Self, RegistryError> {
        let state = Self {
            descriptors: config.backends,
            current_index: config.current_index,
            size_limit_bytes: config.size_limit_bytes,
        };
        state.validate()?;
        Ok(state)
    }

    /// The durable form of this state.
    pub fn to_config(&self) -> RegistryConfig {
        RegistryConfig {
            size_limit_bytes: self.size_limit_bytes,
            current_index: self.current_index,
            backends: self.descriptors.clone(),
        }
    }

    /// Checks every registry invariant.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.descriptors.is_empty() {
            return Err(invalid("registry has no backends"));
        }
        if self.size_limit_bytes == 0 {
            return Err(invalid("size_limit_bytes must be greater than zero"));
        }
        if self.current_index > self.descriptors.len() {
            return Err(invalid(format!(
                "current_index {} is out of range for {} backends",
                self.current_index,
                self.descriptors.len()
            )));
        }

        let pg_name = Regex::new(POSTGRES_DATABASE_PATTERN)
            .map_err(|e| invalid(format!("database name pattern: {}", e)))?;

        for (position, descriptor) in self.descriptors.iter().enumerate() {
            if descriptor.id != position {
                return Err(invalid(format!(
                    "backend at position {} has id {}",
                    position, descriptor.id
                )));
            }
            if descriptor.database.trim().is_empty() {
                return Err(invalid(format!("backend {} has no database name", position)));
            }
            if descriptor.kind == BackendKind::Postgres && !pg_name.is_match(&descriptor.database) {
                return Err(invalid(format!(
                    "backend {} has an invalid database name '{}'",
                    position, descriptor.database
                )));
            }
            if descriptor.max_connections == 0 {
                return Err(invalid(format!("backend {} allows no connections", position)));
            }

            let should_be_exhausted = position < self.current_index;
            if descriptor.exhausted != should_be_exhausted {
                return Err(invalid(format!(
                    "backend {} has exhausted={} but current_index is {}",
                    position, descriptor.exhausted, self.current_index
                )));
            }
        }

        Ok(())
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        if self.current_index < self.descriptors.len() {
            Phase::Active(self.current_index)
        } else {
            Phase::Exhausted
        }
    }

    /// Returns true once every backend is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.phase() == Phase::Exhausted
    }

    /// The active descriptor, if any.
    pub fn active(&self) -> Option<&BackendDescriptor> {
        self.descriptors.get(self.current_index)
    }

    /// The descriptor with the given ordinal.
    pub fn descriptor(&self, ordinal: usize) -> Option<&BackendDescriptor> {
        self.descriptors.get(ordinal)
    }

    /// All descriptors in ordinal order.
    pub fn descriptors(&self) -> &[BackendDescriptor] {
        &self.descriptors
    }

    /// Index of the active descriptor (`len()` once exhausted).
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Size ceiling shared by every backend.
    pub fn size_limit_bytes(&self) -> u64 {
        self.size_limit_bytes
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The state after retiring the active descriptor `index`.
    ///
    /// Marks it exhausted and advances `current_index` by one, which is
    /// either the next descriptor or the terminal exhausted phase.
    pub(crate) fn retired(&self, index: usize) -> Result<Self, RegistryError> {
        if index != self.current_index || index >= self.descriptors.len() {
            return Err(invalid(format!(
                "cannot retire backend {} while current_index is {}",
                index, self.current_index
            )));
        }
        let mut next = self.clone();
        next.descriptors[index].exhausted = true;
        next.current_index = index + 1;
        Ok(next)
    }
}

fn invalid(message: impl Into<String>) -> RegistryError {
    RegistryError::InvalidState {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three() -> RegistryState {
        RegistryState::new(
            1000,
            vec![
                BackendDescriptor::memory(0, "m0"),
                BackendDescriptor::memory(1, "m1"),
                BackendDescriptor::memory(2, "m2"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_registry_is_active_at_zero() {
        let state = three();
        assert_eq!(state.phase(), Phase::Active(0));
        assert_eq!(state.active().unwrap().database, "m0");
    }

    #[test]
    fn test_retired_advances_and_marks_exhausted() {
        let state = three().retired(0).unwrap();
        assert_eq!(state.phase(), Phase::Active(1));
        assert!(state.descriptor(0).unwrap().exhausted);
        assert!(!state.descriptor(1).unwrap().exhausted);
        assert!(state.validate().is_ok());

        let done = state.retired(1).unwrap().retired(2).unwrap();
        assert_eq!(done.phase(), Phase::Exhausted);
        assert!(done.active().is_none());
        assert!(done.validate().is_ok());
    }

    #[test]
    fn test_retired_rejects_stale_index() {
        let state = three().retired(0).unwrap();
        assert!(state.retired(0).is_err());
        assert!(state.retired(2).is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_exhaustion() {
        let mut config = three().to_config();
        config.current_index = 1;
        assert!(RegistryState::from_config(config.clone()).is_err());

        config.backends[0].exhausted = true;
        assert!(RegistryState::from_config(config.clone()).is_ok());

        config.backends[2].exhausted = true;
        assert!(RegistryState::from_config(config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ids_and_ranges() {
        let mut config = three().to_config();
        config.backends[1].id = 7;
        assert!(RegistryState::from_config(config).is_err());

        let mut config = three().to_config();
        config.current_index = 4;
        assert!(RegistryState::from_config(config).is_err());

        assert!(RegistryState::new(1000, vec![]).is_err());
        assert!(RegistryState::new(0, vec![BackendDescriptor::memory(0, "m0")]).is_err());
    }

    #[test]
    fn test_validate_postgres_database_names() {
        let ok = RegistryState::new(
            1000,
            vec![BackendDescriptor::postgres(0, "localhost", 5432, "posts_2026-01")],
        );
        assert!(ok.is_ok());

        let bad = RegistryState::new(
            1000,
            vec![BackendDescriptor::postgres(0, "localhost", 5432, "posts; DROP")],
        );
        assert!(matches!(bad, Err(RegistryError::InvalidState { .. })));
    }
}
