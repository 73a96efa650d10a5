//! Durable storage for the relay cursor
//!
//! The cursor is the id of the last post delivered to the sink. It is stored
//! as a decimal string in a small text file. A missing or unreadable file
//! means the relay starts fresh.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{CursorError, Result};
use crate::types::{Cursor, PostId};

/// Read/write boundary for the persisted cursor
pub trait CursorStore: Send + Sync {
    /// Read the persisted cursor
    ///
    /// Never fails: missing or corrupt state is reported as `None`.
    fn load(&self) -> Cursor;

    /// Replace the persisted cursor
    fn save(&self, id: PostId) -> Result<()>;
}

/// Cursor kept in a single text file, replaced by rename on every save
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Cursor {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No cursor file, starting fresh");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cursor file unreadable, starting fresh");
                return None;
            }
        };

        match content.parse::<PostId>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    content = %content.trim(),
                    "Cursor file is corrupt, starting fresh"
                );
                None
            }
        }
    }

    fn save(&self, id: PostId) -> Result<()> {
        let dir = self.directory();
        std::fs::create_dir_all(dir).map_err(CursorError::Io)?;

        // Same directory so the rename never crosses filesystems
        let mut file = NamedTempFile::new_in(dir).map_err(CursorError::Io)?;
        file.write_all(id.to_string().as_bytes())
            .map_err(CursorError::Io)?;
        file.as_file().sync_all().map_err(CursorError::Io)?;
        file.persist(&self.path).map_err(CursorError::Persist)?;

        debug!(cursor = %id, "Cursor saved");
        Ok(())
    }
}
