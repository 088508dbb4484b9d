//! Cached face storage on top of a plain string key-value backend.
//!
//! The store owns every conversion: identity names are URL-safe base64
//! encoded into backend keys, vectors go through [`crate::codec`] and tokens
//! are base64 encoded. Backends only ever see opaque strings.
//!
//! Registration writes vectors and token in a single `put`, but backends are
//! free to persist them as two separate writes. A crash between the two can
//! leave an identity whose token is stale or missing.
//!
//! The cache is not synchronized. A store must be used by one caller at a
//! time; writes made to the backend by anything other than this instance are
//! not detected.

use crate::codec::{self, DecodeError};
use crate::embed::Embedding;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Face data is corrupt: {0}")]
    Decode(#[from] DecodeError),
    #[error("Face not found: {0}")]
    NotFound(String),
    #[error("Token for {name} is corrupt: {source}")]
    Token {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Minimal string key-value storage used by [`FaceStore`].
///
/// Failures are logged by the implementation and reported as `false` or
/// `None`; callers never see I/O errors.
pub trait StoreBackend {
    /// All keys holding face data. `None` if listing failed.
    fn list_keys(&self) -> Option<BTreeSet<String>>;

    /// Whether `key` holds face data
    fn contains_key(&self, key: &str) -> bool {
        self.list_keys()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    /// Store face data and token under `key`.
    /// `is_overwrite` is true only when replacing an existing entry.
    fn put(&mut self, key: &str, value: &str, token: &str, is_overwrite: bool) -> bool;

    fn get_value(&self, key: &str) -> Option<String>;

    fn get_token_value(&self, key: &str) -> Option<String>;

    fn remove(&mut self, key: &str) -> bool;
}

impl<B: StoreBackend + ?Sized> StoreBackend for Box<B> {
    fn list_keys(&self) -> Option<BTreeSet<String>> {
        (**self).list_keys()
    }

    fn contains_key(&self, key: &str) -> bool {
        (**self).contains_key(key)
    }

    fn put(&mut self, key: &str, value: &str, token: &str, is_overwrite: bool) -> bool {
        (**self).put(key, value, token, is_overwrite)
    }

    fn get_value(&self, key: &str) -> Option<String> {
        (**self).get_value(key)
    }

    fn get_token_value(&self, key: &str) -> Option<String> {
        (**self).get_token_value(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        (**self).remove(key)
    }
}

/// Encode an identity name into a backend key
pub fn encode_name(name: &str) -> String {
    URL_SAFE.encode(name.as_bytes())
}

/// Decode a backend key into an identity name
pub fn decode_name(key: &str) -> Option<String> {
    let bytes = URL_SAFE.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}

pub struct FaceStore<B> {
    backend: B,
    /// Either the full set of names or nothing
    names: Option<BTreeSet<String>>,
    vectors: HashMap<String, Vec<Embedding>>,
    tokens: HashMap<String, Vec<u8>>,
}

impl<B: StoreBackend> FaceStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            names: None,
            vectors: HashMap::new(),
            tokens: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Drop everything cached; the next read goes to the backend
    pub fn invalidate(&mut self) {
        self.names = None;
        self.vectors.clear();
        self.tokens.clear();
    }

    /// Populate the names cache if needed. `None` if the backend cannot list.
    fn cached_names(&mut self) -> Option<&BTreeSet<String>> {
        if self.names.is_none() {
            let Some(keys) = self.backend.list_keys() else {
                log::warn!("Could not list enrolled faces, treating store as empty");
                return None;
            };

            let names: BTreeSet<String> = keys
                .iter()
                .filter_map(|key| {
                    let name = decode_name(key);
                    if name.is_none() {
                        log::warn!("Ignoring undecodable face key: {}", key);
                    }
                    name
                })
                .collect();

            log::debug!("Loaded {} enrolled face(s) from backend", names.len());
            self.names = Some(names);
        }
        self.names.as_ref()
    }

    /// All enrolled identity names, in lexicographic order
    pub fn names(&mut self) -> BTreeSet<String> {
        self.cached_names().cloned().unwrap_or_default()
    }

    pub fn contains(&mut self, name: &str) -> bool {
        self.cached_names()
            .map_or(false, |names| names.contains(name))
    }

    /// Register `vectors` and `token` under `name`.
    ///
    /// Returns false without touching anything if `name` already exists and
    /// `replace` is false, if `vectors` is empty, or if the backend write fails.
    pub fn register(
        &mut self,
        name: &str,
        vectors: Vec<Embedding>,
        token: &[u8],
        replace: bool,
    ) -> bool {
        if vectors.is_empty() {
            log::warn!("Refusing to register {} without face data", name);
            return false;
        }

        let key = encode_name(name);
        let duplicate = self.backend.contains_key(&key);
        if duplicate && !replace {
            log::debug!("Face {} already registered", name);
            return false;
        }

        let value = codec::encode(&vectors);
        let token_value = URL_SAFE.encode(token);
        if !self.backend.put(&key, &value, &token_value, duplicate) {
            log::error!("Backend failed to store face {}", name);
            // The backend may have kept part of the write; relist on next read
            self.names = None;
            self.vectors.remove(name);
            self.tokens.remove(name);
            return false;
        }

        if let Some(names) = &mut self.names {
            names.insert(name.to_string());
        }
        log::debug!("Registered {} with {} model(s)", name, vectors.len());
        self.vectors.insert(name.to_string(), vectors);
        self.tokens.insert(name.to_string(), token.to_vec());
        true
    }

    /// Register a single vector, see [`FaceStore::register`]
    pub fn register_one(
        &mut self,
        name: &str,
        vector: Embedding,
        token: &[u8],
        replace: bool,
    ) -> bool {
        self.register(name, vec![vector], token, replace)
    }

    /// Append `vector` to the models already stored for `name`.
    ///
    /// Unknown names fail unless `allow_create` is set, in which case the
    /// identity is created with this one vector.
    pub fn extend_registered(
        &mut self,
        name: &str,
        vector: Embedding,
        token: &[u8],
        allow_create: bool,
    ) -> Result<bool, StoreError> {
        if !self.contains(name) {
            if !allow_create {
                return Ok(false);
            }
            return Ok(self.register_one(name, vector, token, false));
        }

        let mut combined = self.get_vectors(name)?.to_vec();
        combined.push(vector);
        Ok(self.register(name, combined, token, true))
    }

    /// Stored vectors for `name`
    pub fn get_vectors(&mut self, name: &str) -> Result<&[Embedding], StoreError> {
        if !self.vectors.contains_key(name) {
            log::debug!("Face cache miss for {}", name);
            let raw = self
                .backend
                .get_value(&encode_name(name))
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            let vectors = codec::decode(&raw)?;
            self.vectors.insert(name.to_string(), vectors);
        }
        Ok(self.vectors[name].as_slice())
    }

    /// Stored authentication token for `name`
    pub fn get_token(&mut self, name: &str) -> Result<&[u8], StoreError> {
        if !self.tokens.contains_key(name) {
            let raw = self
                .backend
                .get_token_value(&encode_name(name))
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            let token = URL_SAFE.decode(raw.trim()).map_err(|source| StoreError::Token {
                name: name.to_string(),
                source,
            })?;
            self.tokens.insert(name.to_string(), token);
        }
        Ok(self.tokens[name].as_slice())
    }

    /// Remove `name` from the backend and the cache
    pub fn delete(&mut self, name: &str) -> bool {
        if !self.backend.remove(&encode_name(name)) {
            return false;
        }

        if let Some(names) = &mut self.names {
            names.remove(name);
        }
        self.vectors.remove(name);
        self.tokens.remove(name);
        true
    }
}
