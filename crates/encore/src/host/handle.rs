//! HostHandle
//!
//! The thread-safe face of the host thread. Every call is a command over the
//! channel, answered on a oneshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::command::HostCommand;
use super::error::HostError;
use super::lifecycle::PluginSummary;
use crate::bridge::PageFactory;

/// Handle to the spawned plugin host
pub struct HostHandle {
    pub(crate) cmd_tx: mpsc::Sender<HostCommand>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) changed_tx: broadcast::Sender<()>,
    pub(crate) terminated: Arc<AtomicBool>,
    pub(crate) thread_handle: Mutex<Option<thread::JoinHandle<Result<(), HostError>>>>,
}

impl HostHandle {
    /// Send a command and wait for its reply
    async fn request<T>(
        &self,
        make_cmd: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, HostError> {
        if self.is_terminated() {
            return Err(HostError::Terminated);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_cmd(reply_tx))
            .await
            .map_err(|_| HostError::ChannelClosed)?;

        reply_rx.await.map_err(|_| HostError::ChannelClosed)
    }

    /// Send a command without waiting
    async fn post(&self, cmd: HostCommand) -> Result<(), HostError> {
        if self.is_terminated() {
            return Err(HostError::Terminated);
        }
        self.cmd_tx.send(cmd).await.map_err(|_| HostError::ChannelClosed)
    }

    pub async fn list_plugins(&self) -> Result<Vec<PluginSummary>, HostError> {
        self.request(|reply| HostCommand::ListPlugins { reply }).await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<PluginSummary, HostError> {
        let id = id.to_string();
        self.request(|reply| HostCommand::SetEnabled { id, enabled, reply })
            .await?
    }

    pub async fn plugins_directory(&self) -> Result<PathBuf, HostError> {
        self.request(|reply| HostCommand::PluginsDirectory { reply }).await
    }

    pub async fn refresh(&self) -> Result<Vec<PluginSummary>, HostError> {
        self.request(|reply| HostCommand::Refresh { reply }).await?
    }

    pub async fn notify_track_change(&self, track: serde_json::Value) -> Result<(), HostError> {
        self.post(HostCommand::TrackChange { track }).await
    }

    pub async fn notify_theme_change(&self, is_dark: bool) -> Result<(), HostError> {
        self.post(HostCommand::ThemeChange { is_dark }).await
    }

    /// Attach a page built by `factory` on the host thread. Returns the
    /// generation to pass to [`HostHandle::detach_page`].
    pub async fn attach_page(&self, factory: PageFactory) -> Result<u64, HostError> {
        self.request(|reply| HostCommand::AttachPage { factory, reply })
            .await?
    }

    pub async fn detach_page(&self, generation: u64) -> Result<(), HostError> {
        self.post(HostCommand::DetachPage { generation }).await
    }

    /// Receiver for the payload-free "plugins changed" signal
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed_tx.subscribe()
    }

    /// Ask the host to deactivate everything and stop.
    pub fn shutdown(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the host thread to finish.
    pub fn join(&self) -> Result<(), HostError> {
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| HostError::ThreadPanic)??;
        }
        Ok(())
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}
