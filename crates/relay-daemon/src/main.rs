#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use relay_daemon::{build_app, AppState};
use relay_evidence::EvidenceStore;
use relay_forge_client::ForgeConfig;
use relay_store::EventStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-daemon", version, about = "Agent-to-forge relay daemon")]
struct Args {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = relay_config::load_config(args.config.as_deref()).context("load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    let label_rules = relay_config::load_label_rules(config.label_rules_json.as_deref());

    let event_store = EventStore::with_persistence(config.data_dir.join("events"));
    event_store.hydrate().await.context("hydrate event store")?;

    let evidence_store = EvidenceStore::new(config.data_dir.join("evidence-blobs"));

    let mut forge_config = ForgeConfig::new(
        config.app_id.clone(),
        config.installation_id.clone(),
        config.private_key_pem.clone(),
    );
    if let Some(api_base_url) = &config.api_base_url {
        forge_config = forge_config.with_api_base_url(api_base_url.clone());
    }

    let state = Arc::new(AppState {
        shared_secret: config.shared_secret.clone(),
        forge_config,
        label_rules: Arc::new(label_rules),
        event_store: Arc::new(event_store),
        evidence_store: Arc::new(evidence_store),
    });

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    info!(bind = %config.bind_addr, "relay-daemon listening");

    axum::serve(listener, app).await.context("serve")
}
