//! Host thread
//!
//! All plugin state lives on one dedicated thread running a current-thread
//! tokio runtime. Sandboxes are not `Send`, and plugin code never runs
//! concurrently with itself or with another plugin.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::HostOptions;
use super::command::HostCommand;
use super::error::HostError;
use super::handle::HostHandle;
use super::lifecycle::PluginHost;
use crate::plugin::{PluginWatcher, RefreshSignal};

/// Spawn the host thread, wait for startup to finish and return its handle.
///
/// Startup creates the plugins directory, scans it, activates every
/// persisted-enabled plugin and starts the watcher.
pub fn spawn_host(options: HostOptions) -> Result<HostHandle, HostError> {
    let terminated = Arc::new(AtomicBool::new(false));

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (changed_tx, _) = broadcast::channel(16);
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);

    let host_changed_tx = changed_tx.clone();
    let thread_handle = thread::Builder::new()
        .name("encore-host".to_string())
        .spawn(move || -> Result<(), HostError> {
            debug!("[spawn_host] Thread started");

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(HostError::Spawn)?;

            let result = rt.block_on(run_host(options, host_changed_tx, cmd_rx, shutdown_rx, init_tx));

            rt.shutdown_background();
            debug!("[spawn_host] Thread exiting");
            result
        })?;

    // Wait for initialization
    init_rx
        .recv()
        .map_err(|_| HostError::ChannelClosed)?
        .map_err(HostError::Startup)?;

    Ok(HostHandle {
        cmd_tx,
        shutdown_tx,
        changed_tx,
        terminated,
        thread_handle: Mutex::new(Some(thread_handle)),
    })
}

/// The host event loop
async fn run_host(
    options: HostOptions,
    changed_tx: broadcast::Sender<()>,
    mut cmd_rx: mpsc::Receiver<HostCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    init_tx: std::sync::mpsc::SyncSender<Result<(), String>>,
) -> Result<(), HostError> {
    let mut host = PluginHost::new(&options, changed_tx);
    if let Err(e) = host.initialize().await {
        let _ = init_tx.send(Err(e.to_string()));
        return Err(e);
    }

    let signal = Arc::new(RefreshSignal::new(options.debounce));
    let _watcher = if options.watch {
        match PluginWatcher::new(host.plugins_dir(), signal.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Hot reload disabled, failed to watch plugins directory: {}", e);
                None
            }
        }
    } else {
        None
    };

    let _ = init_tx.send(Ok(()));

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let deadline = host.next_timer_deadline();

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("[run_host] Shutdown signal received");
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => cmd.apply(&mut host).await,
                    None => {
                        debug!("[run_host] Command channel closed");
                        break;
                    }
                }
            }

            _ = signal.wait() => {
                info!("Plugins directory changed, refreshing");
                if let Err(e) = host.refresh_plugins().await {
                    warn!("Refresh failed: {}", e);
                }
            }

            _ = sleep_until(deadline) => {
                host.run_due_timers(Instant::now());
            }
        }
    }

    host.shutdown();
    Ok(())
}

/// Sleep until `deadline`, or forever without one
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
