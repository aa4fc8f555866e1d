//! Commands sent to the host thread.

use std::path::PathBuf;

use tokio::sync::oneshot;

use super::error::HostError;
use super::lifecycle::{PluginHost, PluginSummary};
use crate::bridge::PageFactory;

pub(crate) enum HostCommand {
    /// List every registered plugin.
    ListPlugins {
        reply: oneshot::Sender<Vec<PluginSummary>>,
    },

    /// Persist an enabled flag and apply it.
    SetEnabled {
        id: String,
        enabled: bool,
        reply: oneshot::Sender<Result<PluginSummary, HostError>>,
    },

    /// Report the plugins directory.
    PluginsDirectory { reply: oneshot::Sender<PathBuf> },

    /// Rebuild from disk now.
    Refresh {
        reply: oneshot::Sender<Result<Vec<PluginSummary>, HostError>>,
    },

    /// Fan a track change out to active plugins.
    TrackChange { track: serde_json::Value },

    /// Fan a theme change out to active plugins.
    ThemeChange { is_dark: bool },

    /// Build a page collaborator on the host thread and attach it.
    AttachPage {
        factory: PageFactory,
        reply: oneshot::Sender<Result<u64, HostError>>,
    },

    /// Detach the page from `generation`, if still current.
    DetachPage { generation: u64 },
}

impl HostCommand {
    /// Run the command against the host and send back its reply
    pub(crate) async fn apply(self, host: &mut PluginHost) {
        match self {
            HostCommand::ListPlugins { reply } => {
                let _ = reply.send(host.list_plugins());
            }

            HostCommand::SetEnabled { id, enabled, reply } => {
                let result = host.set_enabled(&id, enabled).await;
                let _ = reply.send(result);
            }

            HostCommand::PluginsDirectory { reply } => {
                let _ = reply.send(host.plugins_dir().to_path_buf());
            }

            HostCommand::Refresh { reply } => {
                let result = host.refresh_plugins().await;
                let _ = reply.send(result);
            }

            HostCommand::TrackChange { track } => {
                host.notify_track_change(&track);
            }

            HostCommand::ThemeChange { is_dark } => {
                host.notify_theme_change(is_dark);
            }

            HostCommand::AttachPage { factory, reply } => {
                let result = factory()
                    .map(|page| host.attach_page(page))
                    .map_err(HostError::from);
                let _ = reply.send(result);
            }

            HostCommand::DetachPage { generation } => {
                host.detach_page(generation);
            }
        }
    }
}
