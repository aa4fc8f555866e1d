//! Error types for plugin sandboxes.

use crate::Hook;

/// Errors that can occur while building or driving a sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("Failed to install capabilities: {0}")]
    Capabilities(String),

    #[error("Plugin {plugin} failed to load: {message}")]
    Compile { plugin: String, message: String },

    #[error("Hook {hook} of plugin {plugin} failed: {message}")]
    Hook {
        plugin: String,
        hook: Hook,
        message: String,
    },

    #[error("Sandbox for {0} has been shut down")]
    Terminated(String),

    #[error("Type conversion error: {0}")]
    Conversion(String),
}

pub type SandboxResult<T> = Result<T, SandboxError>;
