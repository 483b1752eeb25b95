//! File-backed persisted edits for `run --state`.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use callflow::MemoryPersistence;

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Edits saved by an earlier run; empty when the file does not exist yet.
    pub fn load(&self) -> Result<MemoryPersistence> {
        if !self.path.exists() {
            return Ok(MemoryPersistence::new());
        }
        let text = fs::read_to_string(&self.path).with_context(|| format!("cannot read {}", self.path.display()))?;
        let value = serde_json::from_str(&text).with_context(|| format!("invalid state file {}", self.path.display()))?;
        let persistence = MemoryPersistence::import(value)?;
        log::info!("loaded {} persisted edits from {}", persistence.len(), self.path.display());
        Ok(persistence)
    }

    pub fn save(&self, persistence: &MemoryPersistence) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&persistence.export())?;
        fs::write(&self.path, text).with_context(|| format!("cannot write {}", self.path.display()))
    }
}
