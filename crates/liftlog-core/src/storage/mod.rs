//! Device-local persistence for the signed-in session.
//!
//! The session lives in two named JSON records:
//!
//! - `user`: the signed-in [`User`]
//! - `auth_token`: the [`TokenPair`] (`{token, refresh_token}`)
//!
//! [`Storage`] is the raw key/value seam with three backends (plain files,
//! the OS keychain, memory). [`SessionRecords`] layers the typed record
//! accessors on top of it.

pub mod file;
pub mod keychain;
pub mod memory;

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::models::{TokenPair, User};

pub use self::file::FileStorage;
pub use self::keychain::KeyringStorage;
pub use self::memory::MemoryStorage;

/// Record key for the signed-in user
pub const USER_KEY: &str = "user";

/// Record key for the access/refresh token pair
pub const AUTH_TOKEN_KEY: &str = "auth_token";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored record '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode record '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A key/value store holding one JSON document per key.
///
/// Removing a key that does not exist succeeds.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Typed access to the `user` and `auth_token` records.
#[derive(Clone)]
pub struct SessionRecords {
    storage: Arc<dyn Storage>,
}

impl SessionRecords {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn user(&self) -> Result<Option<User>, StorageError> {
        self.load(USER_KEY)
    }

    pub fn save_user(&self, user: &User) -> Result<(), StorageError> {
        self.store(USER_KEY, user)
    }

    pub fn remove_user(&self) -> Result<(), StorageError> {
        self.storage.remove(USER_KEY)
    }

    pub fn auth_token(&self) -> Result<Option<TokenPair>, StorageError> {
        self.load(AUTH_TOKEN_KEY)
    }

    pub fn save_auth_token(&self, tokens: &TokenPair) -> Result<(), StorageError> {
        self.store(AUTH_TOKEN_KEY, tokens)
    }

    pub fn remove_auth_token(&self) -> Result<(), StorageError> {
        self.storage.remove(AUTH_TOKEN_KEY)
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.storage.get(key)? {
            Some(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|source| StorageError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let contents = serde_json::to_string(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.storage.save(key, &contents)
    }
}
