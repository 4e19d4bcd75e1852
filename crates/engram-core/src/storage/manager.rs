//! Process-wide storage handle with atomic mode switching.
//!
//! Components hold the manager and call [`StorageManager::current`] to get
//! the `Arc<Storage>` for each operation. Switching modes swaps the default
//! handle; operations already holding the old Arc finish against the old
//! file before it is dropped.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use super::sqlite::{Mode, Result, Storage, StorageError};

/// Owns the default [`Storage`] handle and the data directory.
pub struct StorageManager {
    data_dir: Option<PathBuf>,
    current: RwLock<Arc<Storage>>,
}

impl StorageManager {
    /// Open the store for `mode` and wrap it in a manager.
    pub fn open(mode: Mode, data_dir: Option<PathBuf>) -> Result<Self> {
        let storage = Storage::open(mode, data_dir.clone())?;
        Ok(Self {
            data_dir,
            current: RwLock::new(Arc::new(storage)),
        })
    }

    /// The current default handle. Callers keep the returned Arc for the
    /// duration of one operation, never across a mode switch boundary.
    pub fn current(&self) -> Arc<Storage> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Mode of the current default handle
    pub fn mode(&self) -> Mode {
        self.current().mode()
    }

    /// Atomically switch the process-wide default between primary and demo.
    /// The new store is fully opened and migrated before the swap; if opening
    /// fails the old handle stays in place.
    pub fn switch_mode(&self, mode: Mode) -> Result<Mode> {
        if self.mode() == mode {
            return Ok(mode);
        }
        let fresh = Arc::new(Storage::open(mode, self.data_dir.clone())?);
        let mut guard = self
            .current
            .write()
            .map_err(|_| StorageError::Unavailable("storage manager lock poisoned".into()))?;
        *guard = fresh;
        tracing::info!(mode = %mode, "storage mode switched");
        Ok(mode)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_switch_mode_swaps_default() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(manager.mode(), Mode::Primary);

        manager.switch_mode(Mode::Demo).unwrap();
        assert_eq!(manager.mode(), Mode::Demo);

        // Switching to the same mode is a no-op
        manager.switch_mode(Mode::Demo).unwrap();
        assert_eq!(manager.mode(), Mode::Demo);
    }

    #[test]
    fn test_in_flight_handle_survives_switch() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::open(Mode::Primary, Some(dir.path().to_path_buf())).unwrap();

        let held = manager.current();
        held.ensure_profile("primary_user", "user").unwrap();

        manager.switch_mode(Mode::Demo).unwrap();

        // The held Arc still points at the primary file and keeps working
        assert_eq!(held.mode(), Mode::Primary);
        assert_eq!(held.health_counts().unwrap().profiles, 1);
        assert_eq!(manager.current().health_counts().unwrap().profiles, 0);
    }
}
