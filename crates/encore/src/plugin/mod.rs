//! Plugin discovery
//!
//! Everything about plugin files on disk: their metadata headers, the
//! registry built from a directory scan, the persisted enabled set and the
//! directory watcher.

pub mod metadata;
pub mod registry;
pub mod store;
pub mod watcher;

pub use metadata::{PluginMetadata, SourceStyle, parse_metadata};
pub use registry::{PluginKind, PluginRecord, PluginRegistry, RegistryError, plugin_file};
pub use store::{ENABLED_KEY, SettingsStore, StoreError};
pub use watcher::{PluginWatcher, RefreshSignal};
