//! Persisted enabled set
//!
//! A JSON settings file with a single `enabledPlugins` key mapping plugin id
//! to `true`. It is the only plugin state that survives a restart. Other keys
//! in the file belong to the host and are preserved on every write.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

/// Settings key holding the enabled mapping
pub const ENABLED_KEY: &str = "enabledPlugins";

/// Error type for the settings store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file {path} is not a JSON object, refusing to overwrite it")]
    Malformed { path: PathBuf },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Read-modify-write access to the enabled set
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids currently persisted as enabled. A missing or unreadable file
    /// reads as an empty set.
    pub async fn enabled(&self) -> BTreeSet<String> {
        match self.read().await {
            Ok(settings) => enabled_ids(&settings),
            Err(e) => {
                warn!("{}", e);
                BTreeSet::new()
            }
        }
    }

    /// Persist one id's flag
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut settings = self.read().await?;
        let mut set = enabled_ids(&settings);
        if enabled {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
        self.store_ids(&mut settings, &set).await
    }

    /// Replace the whole enabled set
    pub async fn save_enabled(&self, ids: &BTreeSet<String>) -> Result<(), StoreError> {
        let mut settings = self.read().await?;
        self.store_ids(&mut settings, ids).await
    }

    async fn store_ids(
        &self,
        settings: &mut Map<String, Value>,
        ids: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let mapping: BTreeMap<&str, bool> = ids.iter().map(|id| (id.as_str(), true)).collect();
        settings.insert(ENABLED_KEY.to_string(), serde_json::to_value(mapping)?);

        self.write(settings).await?;
        debug!("Persisted {} enabled plugins", ids.len());
        Ok(())
    }

    /// The whole settings object. Only a missing file reads as empty; anything
    /// else that cannot be read back is an error so it is never overwritten.
    async fn read(&self) -> Result<Map<String, Value>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => Err(StoreError::Malformed {
                path: self.path.clone(),
            }),
        }
    }

    async fn write(&self, settings: &Map<String, Value>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(settings)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, content.as_bytes()))
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }
}

fn enabled_ids(settings: &Map<String, Value>) -> BTreeSet<String> {
    match settings.get(ENABLED_KEY) {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, v)| v.as_bool() == Some(true))
            .map(|(id, _)| id.clone())
            .collect(),
        Some(other) => {
            warn!("Ignoring malformed {} value: {}", ENABLED_KEY, other);
            BTreeSet::new()
        }
        None => BTreeSet::new(),
    }
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let mut file = NamedTempFile::new_in(parent).map_err(io_err)?;
    file.write_all(content).map_err(io_err)?;
    file.as_file().sync_all().map_err(io_err)?;
    file.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
