//! [`StateStore`] implementations: the local filesystem and an in-memory map.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use vigil_core::{StateStore, VigilError};

/// Targets are filesystem paths; content is the file's bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStateStore;

impl FsStateStore {
    pub fn new() -> Self {
        Self
    }
}

impl StateStore for FsStateStore {
    fn read(&self, target: &str) -> vigil_core::Result<Option<Vec<u8>>> {
        match std::fs::read(target) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VigilError::Io(e)),
        }
    }

    fn write(&self, target: &str, content: &[u8]) -> vigil_core::Result<()> {
        if let Some(parent) = Path::new(target).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, content)?;
        Ok(())
    }

    fn remove(&self, target: &str) -> vigil_core::Result<()> {
        match std::fs::remove_file(target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VigilError::Io(e)),
        }
    }
}

/// Keyed byte store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.lock().contains_key(target)
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self, target: &str) -> vigil_core::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(target).cloned())
    }

    fn write(&self, target: &str, content: &[u8]) -> vigil_core::Result<()> {
        self.entries
            .lock()
            .insert(target.to_string(), content.to_vec());
        Ok(())
    }

    fn remove(&self, target: &str) -> vigil_core::Result<()> {
        self.entries.lock().remove(target);
        Ok(())
    }
}
