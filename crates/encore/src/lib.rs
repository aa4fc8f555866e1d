//! Encore - plugin host for a hosted music player page
//!
//! This crate provides the plugin runtime, including:
//! - Plugin discovery, metadata headers and the persisted enabled set
//! - Sandboxed script plugins via `encore_sandbox`
//! - Content scripts and themes injected into the hosted page
//! - Hot reload from the plugins directory
//! - An HTTP/WebSocket API for the settings UI and the page

// Re-export the sandbox crate
pub use encore_sandbox;

// Plugin files, registry, enabled set and watcher
pub mod plugin;

// Page bridge
pub mod bridge;

// Lifecycle controller and host thread
pub mod host;

// HTTP / WebSocket server
pub mod server;

// Configuration
pub mod config;
