//! glean-sc - gallery scanner
//!
//! Runs scan sessions against a recorded surface, serves the HTTP command
//! surface, and browses or exports persisted collections.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glean_common::config::{self, TomlConfig};
use glean_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glean_sc::db::{matches_search, CollectionStore, SqliteCollectionStore};
use glean_sc::fetch::{export_collection, ResolutionChain};
use glean_sc::merge::MergeEngine;
use glean_sc::session::ScanCoordinator;
use glean_sc::surface::replay::ReplayProvider;
use glean_sc::AppState;

/// Event bus capacity for the HTTP surface
const EVENT_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "glean-sc")]
#[command(about = "Progressive gallery scanner")]
#[command(version)]
struct Cli {
    /// Root folder holding the collection database
    #[arg(short, long, global = true, env = "GLEAN_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, global = true, env = "GLEAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one scan session against a recorded surface
    Scan {
        /// Replay fixture (JSON)
        #[arg(short, long)]
        fixture: PathBuf,

        /// Collection name; skips identity extraction
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Serve the HTTP command surface
    Serve {
        /// Replay fixture (JSON) scanned by each session
        #[arg(short, long)]
        fixture: PathBuf,

        /// Port to listen on; defaults to the configured port
        #[arg(short, long, env = "GLEAN_PORT")]
        port: Option<u16>,
    },

    /// List collections
    Collections {
        /// Case-insensitive name filter
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show one collection
    Show { id: String },

    /// Download every resource of a collection
    Export {
        id: String,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let toml_config = match &config_path {
        Some(path) => config::load_toml_config(path)?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root_folder = config::resolve_root_folder(cli.root_folder.as_deref(), &toml_config);
    let db_path = config::resolve_database_path(&root_folder, &toml_config);
    info!("Database: {}", db_path.display());

    let pool = glean_common::db::init_database(&db_path)
        .await
        .context("Failed to open collection database")?;
    let store: Arc<dyn CollectionStore> = Arc::new(SqliteCollectionStore::new(pool));

    match cli.command {
        Commands::Scan { fixture, name } => run_scan(&toml_config, store, &fixture, name).await,
        Commands::Serve { fixture, port } => {
            let port = port.unwrap_or(toml_config.port);
            run_server(&toml_config, store, &fixture, port).await
        }
        Commands::Collections { search } => list_collections(store.as_ref(), search.as_deref()).await,
        Commands::Show { id } => show_collection(store.as_ref(), &id).await,
        Commands::Export { id, out } => run_export(store.as_ref(), &id, &out).await,
    }
}

fn coordinator(
    toml_config: &TomlConfig,
    store: Arc<dyn CollectionStore>,
    fixture: &Path,
    events: EventBus,
) -> Result<ScanCoordinator> {
    let provider = ReplayProvider::from_file(fixture)
        .with_context(|| format!("Failed to load fixture {}", fixture.display()))?;

    Ok(ScanCoordinator::new(
        Arc::new(provider),
        Arc::new(MergeEngine::new(store)),
        events,
        toml_config.canonical.clone(),
        toml_config.scan.clone(),
    ))
}

async fn run_scan(
    toml_config: &TomlConfig,
    store: Arc<dyn CollectionStore>,
    fixture: &Path,
    name: Option<String>,
) -> Result<()> {
    let coordinator = coordinator(toml_config, store, fixture, EventBus::new(EVENT_CAPACITY))?;
    let mut scan_config = toml_config.scan.clone();
    if name.is_some() {
        scan_config.collection_name = name;
    }

    let handle = coordinator.start(Some(scan_config))?;
    let session_id = handle.session_id();
    info!(session_id = %session_id, "Scanning {}", fixture.display());

    let stopper = coordinator.clone();
    let stop_on_signal = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping scan");
            stopper.request_stop();
        }
    });

    let outcome = handle.wait().await?;
    stop_on_signal.abort();

    println!("session:    {}", outcome.session_id);
    println!("status:     {:?}", outcome.status);
    if let Some(display_name) = &outcome.display_name {
        println!("collection: {}", display_name);
    }
    if let Some(exit) = outcome.exit {
        println!("exit:       {:?} after {} iterations", exit, outcome.iterations);
    }
    println!(
        "found:      {} observed, {} unique, {} rejected",
        outcome.stats.observed,
        outcome.discovered_count(),
        outcome.stats.rejected
    );
    if let Some(merge) = outcome.merge {
        println!("merged:     {} new, {} total", merge.new_count, merge.total_count);
    }
    if let Some(error) = outcome.combined_error() {
        println!("error:      {}", error);
    }

    Ok(())
}

async fn run_server(
    toml_config: &TomlConfig,
    store: Arc<dyn CollectionStore>,
    fixture: &Path,
    port: u16,
) -> Result<()> {
    let event_bus = EventBus::new(EVENT_CAPACITY);
    let coordinator = coordinator(toml_config, store.clone(), fixture, event_bus.clone())?;
    let app = glean_sc::build_router(AppState::new(coordinator, store, event_bus));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn list_collections(store: &dyn CollectionStore, search: Option<&str>) -> Result<()> {
    let collections = store.list().await?;
    let mut shown = 0;

    for summary in collections
        .iter()
        .filter(|s| search.map_or(true, |query| matches_search(s, query)))
    {
        println!(
            "{:<32} {:>6}  {}",
            summary.id,
            summary.resource_count,
            summary.updated_at.format("%Y-%m-%d %H:%M")
        );
        shown += 1;
    }

    if shown == 0 {
        println!("No collections");
    }
    Ok(())
}

async fn show_collection(store: &dyn CollectionStore, id: &str) -> Result<()> {
    let collection = store
        .get(id)
        .await?
        .with_context(|| format!("Collection {} not found", id))?;

    println!("{} ({})", collection.display_name, collection.id);
    if let Some(icon) = &collection.icon_ref {
        println!("icon: {}", icon);
    }
    println!("{} resources", collection.resources.len());
    for (index, entry) in collection.resources.iter().enumerate() {
        match &entry.alt {
            Some(alt) => println!("{:>4}  {}  {}", index + 1, entry.key, alt),
            None => println!("{:>4}  {}", index + 1, entry.key),
        }
    }
    Ok(())
}

async fn run_export(store: &dyn CollectionStore, id: &str, out: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("glean-sc/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let report = export_collection(store, &client, &ResolutionChain::standard(), id, out).await?;

    println!("{} files written to {}", report.written.len(), out.display());
    for (key, error) in &report.failed {
        warn!(key = %key, "Not exported: {}", error);
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
