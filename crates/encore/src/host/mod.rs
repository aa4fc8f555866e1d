//! Plugin host
//!
//! The lifecycle controller and notification fan-out, driven from a single
//! host thread. Other threads reach it through [`HostHandle`].

mod command;
mod error;
mod fanout;
mod handle;
mod lifecycle;
mod spawn;

use std::path::PathBuf;
use std::time::Duration;

use encore_sandbox::SandboxOptions;

pub use error::HostError;
pub use handle::HostHandle;
pub use lifecycle::{PluginHost, PluginState, PluginSummary};
pub use spawn::spawn_host;

/// Everything the host needs to start
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub plugins_dir: PathBuf,
    /// JSON settings file holding the enabled set
    pub settings_path: PathBuf,
    /// Refresh automatically when plugin files change
    pub watch: bool,
    /// Extra delay before a watcher-triggered refresh
    pub debounce: Duration,
    pub sandbox: SandboxOptions,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            settings_path: PathBuf::from("settings.json"),
            watch: true,
            debounce: Duration::ZERO,
            sandbox: SandboxOptions::default(),
        }
    }
}
