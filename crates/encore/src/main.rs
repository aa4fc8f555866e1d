//! Encore Server
//!
//! Plugin host with an HTTP/WebSocket API for the settings UI and the page.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use encore::bridge::{HeadlessPage, PageError, PageHost};
use encore::config::Config;
use encore::host::{HostHandle, spawn_host};
use encore::server::{AppState, create_router};

/// Encore Plugin Host
#[derive(Parser, Debug)]
#[command(name = "encore")]
#[command(about = "Encore plugin host", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./encore.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plugins directory
    #[arg(short, long)]
    plugins: Option<PathBuf>,

    /// Settings file holding the enabled plugins
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Server host address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Don't watch the plugins directory
    #[arg(long)]
    no_watch: bool,

    /// Attach an in-process headless page
    #[arg(long)]
    headless_page: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    /// CLI flags win over every other configuration layer
    fn apply(&self, config: &mut Config) {
        if let Some(plugins) = &self.plugins {
            config.plugins_dir = plugins.clone();
        }
        if let Some(settings) = &self.settings {
            config.settings_path = settings.clone();
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.no_watch {
            config.watch = false;
        }
        if self.headless_page {
            config.headless_page = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("encore=info,tower_http=debug"));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Encore v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    info!("Plugins directory: {}", config.plugins_dir.display());
    info!("Settings file: {}", config.settings_path.display());

    let host = Arc::new(spawn_host(config.host_options())?);

    if config.headless_page {
        let factory = Box::new(|| -> Result<Box<dyn PageHost>, PageError> {
            Ok(Box::new(HeadlessPage::new()?))
        });
        let generation = host.attach_page(factory).await?;
        info!("Headless page attached (generation {})", generation);
    }

    let app = create_router(AppState::new(host.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Page endpoint: ws://{}/page", addr);
    info!("Events endpoint: ws://{}/events", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(host.clone()))
        .await?;

    // Deactivate plugins (onDisable, page cleanup) before exiting
    let joined = tokio::task::spawn_blocking(move || host.join()).await?;
    if let Err(e) = joined {
        warn!("Plugin host did not shut down cleanly: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal, then stop the plugin host
async fn shutdown_signal(host: Arc<HostHandle>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    info!("Stopping plugin host...");
    host.shutdown();
}
