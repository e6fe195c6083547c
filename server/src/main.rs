use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use chorus_server::config::{generate_config_template, Config, StoreKind};
use chorus_server::fabric::{gossip, inbound, Fabric, FabricTransport, FleetEvent, LocalBus};
use chorus_server::session::NodeId;
use chorus_server::state::AppState;
use chorus_server::store::{DirectoryStore, HistoryStore, MemoryStore, SqliteStore};
use chorus_server::routes;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chorus_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Chorus server v{} starting", env!("CARGO_PKG_VERSION"));

    // Message log, reactions and room directory
    let (history, directory): (Arc<dyn HistoryStore>, Arc<dyn DirectoryStore>) = match config.store {
        StoreKind::Sqlite => {
            let store = Arc::new(SqliteStore::open(&config.data_dir, config.history.max_messages)?);
            tracing::info!(data_dir = %config.data_dir, "Using SQLite store");
            (store.clone() as Arc<dyn HistoryStore>, store as Arc<dyn DirectoryStore>)
        }
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new(config.history.max_messages));
            tracing::warn!("Using in-memory store; history is lost on restart");
            (store.clone() as Arc<dyn HistoryStore>, store as Arc<dyn DirectoryStore>)
        }
    };

    // Broadcast fabric: gossip mesh between processes, or a loopback bus
    let (transport, peer_id): (Arc<dyn FabricTransport>, Option<String>) = if config.fabric.enabled {
        let gossip = gossip::start(&config.fabric, &config.data_dir).await?;
        let peer_id = gossip.peer_id().to_string();
        (Arc::new(gossip) as Arc<dyn FabricTransport>, Some(peer_id))
    } else {
        (Arc::new(LocalBus::default()) as Arc<dyn FabricTransport>, None)
    };
    let node_id = match config.node_id.clone().or(peer_id) {
        Some(id) => NodeId::new(id),
        None => NodeId::random(),
    };
    let fabric = Fabric::new(node_id.clone(), transport);
    tracing::info!(node = %node_id, transport = fabric.transport_name(), "Fleet node ready");

    // Build application state
    let app_state = AppState::new(node_id, history, directory, fabric, config.settings());
    let hydrated = app_state.hydrate().await?;
    tracing::info!(reactions = hydrated, "Reaction ledger hydrated");

    // Apply events from other nodes, then ask them for their current state
    inbound::spawn(app_state.clone())?;
    app_state.fabric.publish(FleetEvent::Resync);

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
