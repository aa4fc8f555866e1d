//! Plugin Registry
//!
//! In-memory catalog of the plugin files found in the plugins directory.
//! Every scan is a full rebuild from disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use ts_rs::TS;

use super::metadata::{PluginMetadata, SourceStyle, parse_metadata};

/// Error type for registry scans
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read plugins directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a plugin file is, decided by its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// `.js`: runs in a sandbox, may export hooks and a content script
    Script,
    /// `.css`: injected into the page as a stylesheet
    Theme,
}

impl PluginKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" => Some(Self::Script),
            "css" => Some(Self::Theme),
            _ => None,
        }
    }

    pub fn source_style(self) -> SourceStyle {
        match self {
            Self::Script => SourceStyle::Script,
            Self::Theme => SourceStyle::Page,
        }
    }
}

/// Plugin id and kind for a recognized plugin file path
pub fn plugin_file(path: &Path) -> Option<(String, PluginKind)> {
    let kind = PluginKind::from_extension(path.extension()?.to_str()?)?;
    let id = path.file_stem()?.to_str()?;
    if id.is_empty() {
        return None;
    }
    Some((id.to_string(), kind))
}

/// A discovered plugin
#[derive(Debug, Clone)]
pub struct PluginRecord {
    /// Derived from the file name, stable across scans
    pub id: String,
    pub kind: PluginKind,
    pub path: PathBuf,
    pub metadata: PluginMetadata,
    /// Persisted enabled flag
    pub enabled: bool,
}

/// Catalog of discovered plugins keyed by id
#[derive(Debug)]
pub struct PluginRegistry {
    dir: PathBuf,
    records: BTreeMap<String, PluginRecord>,
}

impl PluginRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            records: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rebuild the catalog from disk.
    ///
    /// A file that cannot be read is logged and left out; it never aborts the
    /// rest of the scan. Only a failure to list the directory itself is an
    /// error, in which case the previous catalog is kept.
    pub async fn scan(&mut self, enabled: &BTreeSet<String>) -> Result<(), RegistryError> {
        let read_dir_err = |source: std::io::Error| RegistryError::ReadDir {
            path: self.dir.clone(),
            source,
        };

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await.map_err(read_dir_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
            paths.push(entry.path());
        }
        // File-name order decides which file keeps a contested id
        paths.sort();

        let mut records = BTreeMap::new();
        for path in paths {
            let Some((id, kind)) = plugin_file(&path) else {
                continue;
            };
            if !path.is_file() {
                continue;
            }
            if records.contains_key(&id) {
                warn!("Skipping {}: plugin id {} is already taken", path.display(), id);
                continue;
            }

            let source = match fs::read_to_string(&path).await {
                Ok(source) => source,
                Err(e) => {
                    warn!("Failed to read plugin {}: {}", path.display(), e);
                    continue;
                }
            };

            let metadata = parse_metadata(&id, &source, kind.source_style());
            debug!("Discovered plugin: {} ({} v{})", id, metadata.name, metadata.version);

            records.insert(
                id.clone(),
                PluginRecord {
                    enabled: enabled.contains(&id),
                    id,
                    kind,
                    path,
                    metadata,
                },
            );
        }

        info!("Scanned {} plugins in {}", records.len(), self.dir.display());
        self.records = records;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PluginRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Update the in-memory enabled flag. Returns false for unknown ids.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Ids whose enabled flag is set
    pub fn enabled_ids(&self) -> BTreeSet<String> {
        self.records
            .values()
            .filter(|record| record.enabled)
            .map(|record| record.id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
