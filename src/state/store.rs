//! JSON state persistence

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use super::plan::BotState;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("State serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Reads and writes the bot state document under the data directory
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("state.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state. A missing file is a fresh start; an unreadable
    /// document is logged and treated the same rather than wedging the bot.
    pub fn load(&self) -> Result<Option<BotState>, StateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable state file");
                Ok(None)
            }
        }
    }

    pub fn save(&self, state: &BotState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}
