use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SESSION_FILE_NAME: &str = "session.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionKey {
    LastQuery,
    LastParams,
    Dataset,
}

impl SessionKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastQuery => "last_query",
            Self::LastParams => "last_params",
            Self::Dataset => "dataset",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("failed to read session file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse session file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create session directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize session state: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write session file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait SessionStore {
    fn get(&self, key: SessionKey, default: &str) -> String;

    fn set(&mut self, key: SessionKey, value: &str) -> Result<(), SessionStoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    values: BTreeMap<SessionKey, String>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(mut self, key: SessionKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: SessionKey, default: &str) -> String {
        self.values
            .get(&key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&mut self, key: SessionKey, value: &str) -> Result<(), SessionStoreError> {
        self.values.insert(key, value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dataset: Option<String>,
}

impl SessionDocument {
    fn slot(&self, key: SessionKey) -> Option<&String> {
        match key {
            SessionKey::LastQuery => self.last_query.as_ref(),
            SessionKey::LastParams => self.last_params.as_ref(),
            SessionKey::Dataset => self.dataset.as_ref(),
        }
    }

    fn slot_mut(&mut self, key: SessionKey) -> &mut Option<String> {
        match key {
            SessionKey::LastQuery => &mut self.last_query,
            SessionKey::LastParams => &mut self.last_params,
            SessionKey::Dataset => &mut self.dataset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    document: SessionDocument,
}

impl FileSessionStore {
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                document: SessionDocument::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SessionStoreError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                document: SessionDocument::default(),
            });
        }

        let document = toml::from_str(&raw).map_err(|source| SessionStoreError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(Self { path, document })
    }

    fn persist(&self) -> Result<(), SessionStoreError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SessionStoreError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.document)
            .map_err(|source| SessionStoreError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SessionStoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: SessionKey, default: &str) -> String {
        self.document
            .slot(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn set(&mut self, key: SessionKey, value: &str) -> Result<(), SessionStoreError> {
        let slot = self.document.slot_mut(key);
        if slot.as_deref() == Some(value) {
            return Ok(());
        }
        *slot = Some(value.to_string());
        self.persist()
    }
}
