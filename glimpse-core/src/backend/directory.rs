use super::{is_valid_key, token_key, write_atomic, BackendError};
use crate::store::StoreBackend;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Stores each key as one file in a dedicated directory.
///
/// The token for a key lives next to it in `<key>.hat`. The directory must
/// not contain anything else without a `.` in its name.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    dir: PathBuf,
}

impl DirectoryBackend {
    /// Open an existing, writable directory
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, BackendError> {
        let dir = dir.as_ref().to_path_buf();
        let metadata = fs::metadata(&dir).map_err(|source| BackendError::Io {
            path: dir.clone(),
            source,
        })?;

        if !metadata.is_dir() {
            return Err(BackendError::NotADirectory(dir));
        }
        if metadata.permissions().readonly() {
            return Err(BackendError::ReadOnly(dir));
        }

        Ok(Self { dir })
    }

    /// Create the directory (owner-only on unix) if needed, then open it
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, BackendError> {
        let dir = dir.as_ref();
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|source| BackendError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(
                    |source| BackendError::Io {
                        path: dir.to_path_buf(),
                        source,
                    },
                )?;
            }
        }
        Self::open(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn read(&self, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No stored entry at {}", path.display());
                None
            }
            Err(e) => {
                log::error!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl StoreBackend for DirectoryBackend {
    fn list_keys(&self) -> Option<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Failed to list {}: {}", self.dir.display(), e);
                return None;
            }
        };

        let mut keys = BTreeSet::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::error!("Failed to list {}: {}", self.dir.display(), e);
                    return None;
                }
            };
            // Token files and temp files carry a '.'
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_key(name) {
                    keys.insert(name.to_string());
                }
            }
        }
        Some(keys)
    }

    fn contains_key(&self, key: &str) -> bool {
        is_valid_key(key) && self.path(key).is_file()
    }

    fn put(&mut self, key: &str, value: &str, token: &str, is_overwrite: bool) -> bool {
        if !is_valid_key(key) {
            log::error!("Invalid storage key: {:?}", key);
            return false;
        }

        let value_path = self.path(key);
        let existed = value_path.exists();
        if existed && !is_overwrite {
            log::error!(
                "{} already exists and overwrite was not requested",
                value_path.display()
            );
            return false;
        }

        if let Err(e) = write_atomic(&value_path, value) {
            log::error!("Failed to write {}: {}", value_path.display(), e);
            return false;
        }

        let token_path = self.path(&token_key(key));
        if let Err(e) = write_atomic(&token_path, token) {
            log::error!("Failed to write {}: {}", token_path.display(), e);
            // A new entry without its token must not be left behind
            if !existed {
                if let Err(e) = fs::remove_file(&value_path) {
                    log::error!("Failed to roll back {}: {}", value_path.display(), e);
                }
            }
            return false;
        }

        true
    }

    fn get_value(&self, key: &str) -> Option<String> {
        if !is_valid_key(key) {
            return None;
        }
        self.read(&self.path(key))
    }

    fn get_token_value(&self, key: &str) -> Option<String> {
        if !is_valid_key(key) {
            return None;
        }
        self.read(&self.path(&token_key(key)))
    }

    fn remove(&mut self, key: &str) -> bool {
        if !is_valid_key(key) {
            return false;
        }

        let value_path = self.path(key);
        if let Err(e) = fs::remove_file(&value_path) {
            log::error!("Failed to delete {}: {}", value_path.display(), e);
            return false;
        }

        let token_path = self.path(&token_key(key));
        match fs::remove_file(&token_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete {}: {}", token_path.display(), e),
        }
        true
    }
}
