//! Configuration
//!
//! Layered with figment, later layers winning:
//!
//! 1. built-in defaults
//! 2. a TOML file (`encore.toml` unless `--config` says otherwise)
//! 3. `ENCORE_` environment variables, `__` separating nested keys
//!    (`ENCORE_SERVER__PORT=7000`)
//!
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use encore_sandbox::SandboxOptions;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::host::HostOptions;

/// Default configuration file name
pub const CONFIG_FILE: &str = "encore.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ENCORE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned for `.js` and `.css` plugins
    pub plugins_dir: PathBuf,
    /// JSON settings file holding the enabled set
    pub settings_path: PathBuf,
    /// Refresh when plugin files change
    pub watch: bool,
    /// Extra delay before a watcher-triggered refresh
    pub debounce_ms: u64,
    /// Attach an in-process page instead of waiting for one on `/page`
    pub headless_page: bool,
    pub sandbox: SandboxConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Per-plugin heap limit in bytes
    pub memory_limit: Option<usize>,
    /// Per-plugin stack limit in bytes
    pub max_stack_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("./data/plugins"),
            settings_path: PathBuf::from("./data/settings.json"),
            watch: true,
            debounce_ms: 0,
            headless_page: false,
            sandbox: SandboxConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9700,
        }
    }
}

impl Config {
    /// Build the figment for `file` (or [`CONFIG_FILE`]). A missing file is
    /// not an error.
    pub fn figment(file: Option<&Path>) -> Figment {
        let file = file.unwrap_or_else(|| Path::new(CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(file).extract()
    }

    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            plugins_dir: self.plugins_dir.clone(),
            settings_path: self.settings_path.clone(),
            watch: self.watch,
            debounce: Duration::from_millis(self.debounce_ms),
            sandbox: SandboxOptions {
                memory_limit: self.sandbox.memory_limit,
                max_stack_size: self.sandbox.max_stack_size,
            },
        }
    }
}
