use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vstream_crypto_envelope::EnvelopeKeyring;
use vstream_registry::SessionRegistry;
use vstream_storage_state::{MemoryRepo, PriorityLoader, StorageStateStore};

use crate::config::Config;
use crate::metrics;
use crate::server::{build_router, AppState};
use crate::session::{SessionManager, StubLauncher};

#[derive(Parser)]
#[command(name = "vstream", version, about = "Visual streaming backend for automated browser workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the streaming server.
    Serve {
        /// Listen address; overrides VSTREAM_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Log filter, e.g. `info,streamer=debug`; overrides RUST_LOG.
        #[arg(long)]
        log: Option<String>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind, log } => serve(bind, log).await,
    }
}

async fn serve(bind: Option<SocketAddr>, log: Option<String>) -> anyhow::Result<()> {
    let filter = log
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env();
    if let Some(bind) = bind {
        config.bind = bind;
    }
    let config = Arc::new(config);
    metrics::register_metrics();

    let store = build_store(&config);
    if store.is_none() {
        warn!(target: "cli", "crypto envelope keys not configured; storage-state persistence disabled");
    }
    let loader = Arc::new(PriorityLoader::new(
        store.clone(),
        config.user_state_dir.clone(),
        config.shared_state_file.clone(),
        config.cookie_verify_ttl_hours,
    ));

    let registry = Arc::new(SessionRegistry::new());
    let manager = SessionManager::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        store.clone(),
        loader,
        StubLauncher::new(),
    );

    let state = AppState {
        config: Arc::clone(&config),
        registry,
        manager: Arc::clone(&manager),
        store,
    };
    let router = build_router(state);

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(target: "cli", bind = %config.bind, "vstream listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(manager))
        .await
        .context("server error")?;
    Ok(())
}

/// Sealed-store wiring: both halves present gives full save/load; a public
/// key alone still allows saving.
fn build_store(config: &Config) -> Option<Arc<StorageStateStore>> {
    let kid = config.cookie_kid.clone()?;
    let keyring = if let Some(private_pem) = &config.cookie_private_key_pem {
        EnvelopeKeyring::from_private_pem(&kid, private_pem)
    } else if let Some(public_pem) = &config.cookie_public_key_pem {
        EnvelopeKeyring::from_public_pem(&kid, public_pem)
    } else {
        return None;
    };
    match keyring {
        Ok(keyring) => Some(Arc::new(StorageStateStore::new(
            Arc::new(MemoryRepo::new()),
            Arc::new(keyring),
        ))),
        Err(err) => {
            warn!(target: "cli", %err, "failed to load crypto envelope keys");
            None
        }
    }
}

async fn shutdown_signal(manager: Arc<SessionManager>) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!(target: "cli", "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!(target: "cli", "shutdown requested; finalizing sessions");
    manager.cancel_all();
    manager.wait_idle(Duration::from_secs(10)).await;
}
