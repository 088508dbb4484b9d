use crate::store::StoreBackend;
use std::collections::{BTreeMap, BTreeSet};

/// Volatile in-process backend. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: BTreeMap<String, String>,
    tokens: BTreeMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreBackend for MemoryBackend {
    fn list_keys(&self) -> Option<BTreeSet<String>> {
        Some(self.values.keys().cloned().collect())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn put(&mut self, key: &str, value: &str, token: &str, is_overwrite: bool) -> bool {
        if self.values.contains_key(key) && !is_overwrite {
            log::error!("Refusing to overwrite existing entry {}", key);
            return false;
        }
        self.values.insert(key.to_string(), value.to_string());
        self.tokens.insert(key.to_string(), token.to_string());
        true
    }

    fn get_value(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn get_token_value(&self, key: &str) -> Option<String> {
        self.tokens.get(key).cloned()
    }

    fn remove(&mut self, key: &str) -> bool {
        self.tokens.remove(key);
        self.values.remove(key).is_some()
    }
}
