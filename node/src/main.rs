// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;

use idstate_node::config::NodeConfig;
use idstate_node::did::DidMethodTable;
use idstate_node::engine::{spawn_deadline_watcher, EngineSettings, StateEngine};
use idstate_node::keys::{KeyManager, KeyType, LocalKeyProvider};
use idstate_node::publisher::{Publisher, ShutdownPolicy};
use idstate_node::store::{MemoryNodeStore, MemoryStateStore, NodeStore, StateStore};
use idstate_node::telemetry::{get_metrics, init_telemetry};

#[tokio::main]
async fn main() {
    init_telemetry();

    let cfg = match NodeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Config error: {}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("Initializing idstate node with config: {:?}", cfg);

    // DID methods are fixed from here on.
    let dids = match DidMethodTable::with_defaults(&cfg.did_networks) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            tracing::error!("DID method registration failed: {}", e);
            std::process::exit(2);
        }
    };

    let mut keys = KeyManager::new();
    if let Err(e) = keys.register_provider(KeyType::Ed25519, Arc::new(LocalKeyProvider::new())) {
        tracing::error!("Key provider registration failed: {}", e);
        std::process::exit(2);
    }

    let nodes: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
    let states: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

    let publisher = match Publisher::from_config(&cfg.publisher, states.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Publisher setup failed: {}", e);
            std::process::exit(2);
        }
    };

    let engine = Arc::new(StateEngine::new(
        EngineSettings::from(&cfg),
        nodes,
        states,
        Arc::new(keys),
        dids,
        publisher.clone(),
    ));
    let watcher = spawn_deadline_watcher(engine.clone(), cfg.deadline_check_interval());

    tracing::info!("idstate node ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Signal handler failed: {}", e);
    }

    watcher.abort();
    let report = publisher.shutdown(ShutdownPolicy::Drain).await;
    tracing::debug!("final metrics:\n{}", get_metrics());
    tracing::info!(pending = report.pending, discarded = report.discarded, "idstate node stopped");
}
