//! Durable per-room message history.
//!
//! Each room's log lives in its own JSON file holding the full ordered array
//! of messages. The file is rewritten on every append through a temp file and
//! rename, so a reader sees either the previous log or the new one.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{Result, RoomchatError};

/// File-backed store of room histories.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the history files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `room`.
    ///
    /// Room names are percent-encoded so that any name maps to a single file
    /// inside the history directory.
    pub fn path_for(&self, room: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(room)))
    }

    /// Create the history directory if it does not exist.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Load the ordered log for `room`.
    ///
    /// A missing record yields an empty log. An unreadable or corrupt record
    /// is logged and also yields an empty log.
    pub async fn load(&self, room: &str) -> Vec<String> {
        let path = self.path_for(room);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read history for room {}: {}", room, e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(messages) => {
                debug!("Loaded {} messages for room {}", messages.len(), room);
                messages
            }
            Err(e) => {
                warn!("Ignoring corrupt history for room {}: {}", room, e);
                Vec::new()
            }
        }
    }

    /// Persist the full log for `room`.
    pub async fn save(&self, room: &str, messages: &[String]) -> Result<()> {
        let json = serde_json::to_vec(messages)
            .map_err(|e| RoomchatError::Persistence(e.to_string()))?;
        let path = self.path_for(room);
        let temp_path = path.with_extension("json.tmp");

        self.write_atomic(&temp_path, &path, &json)
            .await
            .map_err(|e| RoomchatError::Persistence(format!("{}: {e}", path.display())))
    }

    /// Append `message` to the in-memory `log` and persist the result.
    ///
    /// The message stays in `log` even if the write fails.
    pub async fn append(&self, room: &str, log: &mut Vec<String>, message: String) -> Result<()> {
        log.push(message);
        self.save(room, log).await
    }

    async fn write_atomic(&self, temp_path: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let mut file = fs::File::create(temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(temp_path, path).await
    }
}
