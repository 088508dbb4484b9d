use super::{token_key, write_atomic, BackendError, TOKEN_SUFFIX};
use crate::store::StoreBackend;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Single JSON preferences document holding every key.
///
/// The document is loaded once on open; each mutation commits the whole
/// document back to disk.
#[derive(Debug)]
pub struct PreferencesBackend {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl PreferencesBackend {
    /// Load preferences from `path`. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let contents = fs::read_to_string(&path).map_err(|source| BackendError::Io {
            path: path.clone(),
            source,
        })?;
        let entries = serde_json::from_str(&contents).map_err(|source| BackendError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&self) -> bool {
        let json = match serde_json::to_string_pretty(&self.entries) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize preferences: {}", e);
                return false;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::error!("Failed to create {}: {}", parent.display(), e);
                return false;
            }
        }

        match write_atomic(&self.path, &json) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to commit {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Apply `changes` (None removes) and commit, rolling back on failure
    fn apply(&mut self, changes: Vec<(String, Option<String>)>) -> bool {
        let mut previous = Vec::with_capacity(changes.len());
        for (key, value) in changes {
            let old = match value {
                Some(value) => self.entries.insert(key.clone(), value),
                None => self.entries.remove(&key),
            };
            previous.push((key, old));
        }

        if self.commit() {
            return true;
        }

        for (key, old) in previous.into_iter().rev() {
            match old {
                Some(value) => self.entries.insert(key, value),
                None => self.entries.remove(&key),
            };
        }
        false
    }
}

impl StoreBackend for PreferencesBackend {
    fn list_keys(&self) -> Option<BTreeSet<String>> {
        Some(
            self.entries
                .keys()
                .filter(|key| !key.ends_with(TOKEN_SUFFIX))
                .cloned()
                .collect(),
        )
    }

    fn contains_key(&self, key: &str) -> bool {
        !key.ends_with(TOKEN_SUFFIX) && self.entries.contains_key(key)
    }

    fn put(&mut self, key: &str, value: &str, token: &str, is_overwrite: bool) -> bool {
        if key.ends_with(TOKEN_SUFFIX) {
            log::error!("Invalid storage key: {:?}", key);
            return false;
        }
        if self.entries.contains_key(key) && !is_overwrite {
            log::error!("Refusing to overwrite existing preference {}", key);
            return false;
        }

        self.apply(vec![
            (key.to_string(), Some(value.to_string())),
            (token_key(key), Some(token.to_string())),
        ])
    }

    fn get_value(&self, key: &str) -> Option<String> {
        if key.ends_with(TOKEN_SUFFIX) {
            return None;
        }
        self.entries.get(key).cloned()
    }

    fn get_token_value(&self, key: &str) -> Option<String> {
        self.entries.get(&token_key(key)).cloned()
    }

    fn remove(&mut self, key: &str) -> bool {
        if !self.contains_key(key) {
            return false;
        }
        self.apply(vec![(key.to_string(), None), (token_key(key), None)])
    }
}
