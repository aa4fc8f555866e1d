//! Error types for the plugin host.

use crate::bridge::PageError;
use crate::plugin::{RegistryError, StoreError};

/// Errors surfaced by the host and its handle.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Host has shut down")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Host thread panicked")]
    ThreadPanic,

    #[error("Failed to spawn host thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Host failed to start: {0}")]
    Startup(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Page(#[from] PageError),
}
