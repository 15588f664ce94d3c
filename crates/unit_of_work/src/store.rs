//! FileCheckpointStore - JSON checkpoint file

use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use contracts::{CheckpointStore, ContractError};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    position: String,
    committed_at: DateTime<Utc>,
}

/// Stores the last committed position in a JSON file
///
/// Commits write a sibling temp file and rename it over the target, so a
/// crash never leaves a half-written checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    name: String,
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }
}

fn unavailable(action: &str, path: &Path, err: std::io::Error) -> ContractError {
    ContractError::store_unavailable(format!("{action} {}: {err}", path.display()))
}

impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn commit(&self, position: &str) -> Result<(), ContractError> {
        let contents = serde_json::to_vec_pretty(&CheckpointFile {
            position: position.to_string(),
            committed_at: Utc::now(),
        })
        .map_err(|e| ContractError::store_corrupt(format!("cannot encode checkpoint: {e}")))?;

        let temp = self.temp_path();
        fs::write(&temp, contents).map_err(|e| unavailable("write", &temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| unavailable("rename", &self.path, e))?;

        debug!(store = %self.name, position, "Checkpoint committed");
        Ok(())
    }

    fn load(&self) -> Result<Option<String>, ContractError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable("read", &self.path, e)),
        };

        let file: CheckpointFile = serde_json::from_slice(&contents).map_err(|e| {
            ContractError::store_corrupt(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Some(file.position))
    }
}
