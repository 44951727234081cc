//! The conclave-server binary: wires the store, prompt resolver,
//! provider registry, engine, and HTTP facade together.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use conclave_agents::config::EngineConfig;
use conclave_agents::engine::DeliberationEngine;
use conclave_agents::providers::ProviderRegistry;
use conclave_agents::runner::AgentRunner;
use conclave_agents::server::{ApiServer, AppState};
use conclave_agents::studio::ExperimentStore;
use deliberation::{
    EventBus, MemoryStore, PriceTable, PromptStore, RocksStore, SharedSessionStore,
};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about = "Conclave multi-agent deliberation server")]
struct Args {
    /// Port to listen on (overrides CONCLAVE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the RocksDB state directory (overrides CONCLAVE_STATE_PATH).
    #[arg(long)]
    state_path: Option<std::path::PathBuf>,

    /// Force the ephemeral in-memory store even if a state path is set.
    #[arg(long, default_value_t = false)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conclave_agents=info".parse()?)
                .add_directive("deliberation=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = EngineConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.state_path {
        config.state_path = Some(path);
    }
    if args.memory {
        config.state_path = None;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let (store, prompts): (SharedSessionStore, Arc<PromptStore>) = match &config.state_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "opening database store");
            let rocks = RocksStore::open(path)
                .map_err(|e| anyhow::anyhow!("failed to open state store: {}", e))?
                .shared();
            let prompts = PromptStore::with_persistence(rocks.clone())
                .map_err(|e| anyhow::anyhow!("failed to load prompt templates: {}", e))?;
            (rocks, Arc::new(prompts))
        }
        None => {
            tracing::warn!("no storage configured, using ephemeral in-memory store");
            (Arc::new(MemoryStore::new()), Arc::new(PromptStore::new()))
        }
    };

    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let bus = EventBus::new().shared();
    let runner = Arc::new(AgentRunner::new(
        registry.clone(),
        prompts.clone(),
        PriceTable::builtin(),
        store.clone(),
        bus.clone(),
        config.retry,
        config.call_timeout,
    ));
    let engine = Arc::new(DeliberationEngine::new(
        store.clone(),
        runner,
        registry.clone(),
        bus.clone(),
        config.session_deadline,
    ));

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        store,
        prompts,
        registry,
        engine,
        bus,
        experiments: Arc::new(ExperimentStore::new()),
        running: tokio::sync::RwLock::new(Default::default()),
    });

    let server = Arc::new(ApiServer::new(state));
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown_server.shutdown().await;
        }
    });

    server.serve(port).await
}
