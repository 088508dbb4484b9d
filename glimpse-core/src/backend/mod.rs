//! Concrete [`crate::store::StoreBackend`] implementations.

mod directory;
mod memory;
mod preferences;

pub use directory::DirectoryBackend;
pub use memory::MemoryBackend;
pub use preferences::PreferencesBackend;

use crate::config::{BackendKind, StorageConfig};
use crate::store::StoreBackend;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Suffix of the entry holding a key's token.
/// `.` is outside the URL-safe base64 alphabet, so no face key can collide.
pub const TOKEN_SUFFIX: &str = ".hat";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Storage location is read-only: {0}")]
    ReadOnly(PathBuf),
    #[error("Invalid preferences file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Open the backend selected by `config`, creating the face directory if needed
pub fn open(config: &StorageConfig) -> Result<Box<dyn StoreBackend>, BackendError> {
    let backend: Box<dyn StoreBackend> = match config.backend {
        BackendKind::Directory => Box::new(DirectoryBackend::create(&config.path)?),
        BackendKind::Preferences => Box::new(PreferencesBackend::open(&config.path)?),
        BackendKind::Memory => {
            log::warn!("Using volatile face storage, nothing will be persisted");
            Box::new(MemoryBackend::new())
        }
    };
    log::debug!("Opened {:?} face storage at {}", config.backend, config.path.display());
    Ok(backend)
}

fn token_key(key: &str) -> String {
    format!("{}{}", key, TOKEN_SUFFIX)
}

/// Keys become file names, so anything that could escape or alias one is refused
fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(|c| matches!(c, '/' | '\\' | '.'))
}

/// Replace `path` with `contents` via a temp file in the same directory
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;

    let file = tmp.persist(path).map_err(|err| err.error)?;

    // Owner read/write only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}
