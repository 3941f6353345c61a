//! Savegame persistence

use crate::types::Savegame;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("savegame io: {0}")]
    Io(#[from] std::io::Error),

    #[error("savegame format: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait SaveStore: Send {
    fn load(&self) -> StoreResult<Option<Savegame>>;
    fn save(&mut self, game: &Savegame) -> StoreResult<()>;
}

/// Pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SaveStore for JsonFileStore {
    fn load(&self) -> StoreResult<Option<Savegame>> {
        match std::fs::read_to_string(&self.path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, game: &Savegame) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(game)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Keeps the savegame in memory; clones share the slot
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<Savegame>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Option<Savegame> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SaveStore for MemoryStore {
    fn load(&self) -> StoreResult<Option<Savegame>> {
        Ok(self.saved())
    }

    fn save(&mut self, game: &Savegame) -> StoreResult<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(*game);
        Ok(())
    }
}
