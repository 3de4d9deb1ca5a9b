//! sift-ip - Image Pipeline service
//!
//! Hosts the candidate-selection job pipeline: job submission, candidate
//! generation/scoring against external model capabilities, the result
//! cache with fuzzy lookup, and the subscriber WebSocket registry with
//! liveness sweeping.

use anyhow::Result;
use clap::Parser;
use sift_common::events::EventBus;
use sift_ip::cache::ResultCache;
use sift_ip::pipeline::{CandidateGenerator, Orchestrator};
use sift_ip::providers::ProviderRegistry;
use sift_ip::registry::SubscriptionRegistry;
use sift_ip::storage::StorageManager;
use sift_ip::AppState;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sift-ip", about = "SIFT image pipeline service")]
struct Args {
    /// Root folder for the database and stored artifacts
    #[arg(long)]
    root_folder: Option<String>,

    /// Listen port
    #[arg(long, default_value_t = sift_ip::config::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting sift-ip (Image Pipeline) service");
    info!("Port: {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder and ensure it exists
    let root_folder =
        sift_common::config::resolve_root_folder(args.root_folder.as_deref(), "SIFT_ROOT_FOLDER");
    sift_common::config::ensure_root_folder(&root_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", root_folder.display());

    // Step 2: Open or create database
    let db_path = sift_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = sift_ip::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 3: Load TOML config tier (absent file is fine)
    let toml_path = sift_common::config::default_config_path();
    let toml_config = sift_common::config::load_toml_config(&toml_path).unwrap_or_default();

    // Step 4: Resolve provider API keys (Database → ENV → TOML)
    let openai_key = sift_ip::config::resolve_openai_api_key(&db_pool, &toml_config).await?;
    let gemini_key = sift_ip::config::resolve_gemini_api_key(&db_pool, &toml_config).await?;
    let providers = Arc::new(ProviderRegistry::from_keys(openai_key, gemini_key));

    // Step 5: Event bus for SSE broadcasting and registry delivery
    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    // Step 6: Storage, cache, registry, pipeline
    let base_url = sift_ip::config::resolve_base_url(args.port);
    let storage = Arc::new(StorageManager::new(&root_folder, base_url));
    let media_dir = storage.media_dir().to_path_buf();

    let cache = ResultCache::new(db_pool.clone(), providers.similarity(), event_bus.clone());

    let registry = Arc::new(SubscriptionRegistry::new());
    tokio::spawn(Arc::clone(&registry).run_liveness_sweep());

    tokio::spawn(sift_ip::event_bridge::run_event_bridge(
        event_bus.subscribe(),
        Arc::clone(&registry),
    ));

    let generator = Arc::new(CandidateGenerator::new(storage));
    let orchestrator = Orchestrator::new(cache.clone(), providers, generator, event_bus.clone());

    // Create application state
    let state = AppState::new(db_pool, event_bus, cache, registry, orchestrator, media_dir);

    // Build router
    let app = sift_ip::build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("Listening on http://127.0.0.1:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
