//! Durable storage of the credential pair and cached session record.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::codec;
use crate::credentials::CredentialPair;
use crate::record::SessionRecord;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Legacy duplicate of the access token, still read by session-inspection tooling.
pub const SESSION_TOKEN_KEY: &str = "session_token";
pub const USER_DATA_KEY: &str = "user_data";

const ALL_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    SESSION_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    USER_DATA_KEY,
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// String key-value backend. Implementations lock internally.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`. A corrupt file is
    /// treated as an empty store and overwritten on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "discarding unreadable session file");
                BTreeMap::new()
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let encoded = serde_json::to_string_pretty(entries)?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encoded).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

/// Credential pair and session record on top of a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(FileStore::open(path)?)))
    }

    /// The stored access token, exactly as written.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.backend.get_item(ACCESS_TOKEN_KEY)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.backend.get_item(REFRESH_TOKEN_KEY)
    }

    /// Both tokens, or `None` if either is missing or blank.
    #[must_use]
    pub fn credentials(&self) -> Option<CredentialPair> {
        Some(CredentialPair::new(
            non_blank(self.access_token())?,
            non_blank(self.refresh_token())?,
        ))
    }

    /// Stored session JSON, unchanged; `None` when absent or unparseable.
    #[must_use]
    pub fn session_data(&self) -> Option<Value> {
        let raw = self.backend.get_item(USER_DATA_KEY)?;
        serde_json::from_str(&raw).ok()
    }

    /// Typed view of [`TokenStore::session_data`]; `None` if the stored value
    /// does not fit the record shape.
    #[must_use]
    pub fn session_record(&self) -> Option<SessionRecord> {
        serde_json::from_value(self.session_data()?).ok()
    }

    /// Overwrites the pair and, when given, the session value. The session is
    /// encoded before anything is written so a failure leaves the store intact.
    pub fn set_tokens(
        &self,
        access: &str,
        refresh: &str,
        session: Option<&Value>,
    ) -> Result<(), StoreError> {
        let encoded_session = session.map(serde_json::to_string).transpose()?;

        self.backend.set_item(ACCESS_TOKEN_KEY, access)?;
        self.backend.set_item(SESSION_TOKEN_KEY, access)?;
        self.backend.set_item(REFRESH_TOKEN_KEY, refresh)?;
        if let Some(encoded) = encoded_session {
            self.backend.set_item(USER_DATA_KEY, &encoded)?;
        }
        Ok(())
    }

    pub fn set_credentials(
        &self,
        pair: &CredentialPair,
        session: Option<&SessionRecord>,
    ) -> Result<(), StoreError> {
        let session = session.map(serde_json::to_value).transpose()?;
        self.set_tokens(&pair.access, &pair.refresh, session.as_ref())
    }

    /// Replaces only the cached session value.
    pub fn set_session_data(&self, session: &Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(session)?;
        self.backend.set_item(USER_DATA_KEY, &encoded)
    }

    pub fn set_session_record(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.set_session_data(&serde_json::to_value(session)?)
    }

    /// Removes every session key. Safe to call on an empty store.
    pub fn clear_tokens(&self) -> Result<(), StoreError> {
        for key in ALL_KEYS {
            self.backend.remove_item(key)?;
        }
        Ok(())
    }

    /// An access token is stored and its `exp` is still ahead of `now_ms`.
    #[must_use]
    pub fn is_authenticated(&self, now_ms: i64) -> bool {
        self.access_token()
            .is_some_and(|token| codec::is_live(&token, now_ms))
    }
}

/// Blank tokens are unusable as credentials.
pub fn non_blank(token: Option<String>) -> Option<String> {
    token.filter(|value| !value.trim().is_empty())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
