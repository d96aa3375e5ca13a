use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use frogvpn_db::{MemoryStore, PgStore, Store};
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api_client;
mod bot;
mod broadcast;
mod config;
mod conversation;
mod error;
mod event;
mod flash_sale;
mod provider;
mod rate_limit;
mod router;
mod services;
mod state;
mod support;
#[cfg(test)]
mod testing;
mod transport;
mod triggers;
mod watchdog;

use crate::api_client::ApiClient;
use crate::bot::telegram::TelegramTransport;
use crate::config::{AppEnv, Config};
use crate::provider::{MarzbanProvider, MockVpnProvider, VpnProvider};
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("frogvpn_bot=info,frogvpn_db=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!(
        "🐸 FrogVPN bot starting ({:?}, {} admins)",
        config.env,
        config.telegram.admin_ids.len()
    );

    let (store, provider): (Arc<dyn Store>, Arc<dyn VpnProvider>) = match config.env {
        AppEnv::Local => {
            warn!("Local mode: in-memory store and mock provisioning");
            (
                Arc::new(MemoryStore::with_default_catalog()),
                Arc::new(MockVpnProvider::new()),
            )
        }
        AppEnv::Production => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required in production")?;
            let pool = frogvpn_db::connect(url).await?;
            let api = ApiClient::new(
                config.marzban.base_url.clone(),
                config.marzban.username.clone(),
                config.marzban.password.clone(),
            );
            (
                Arc::new(PgStore::new(pool)),
                Arc::new(MarzbanProvider::new(api)),
            )
        }
    };

    let bot = Bot::new(config.telegram.token.clone());
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let watchdog_enabled = config.watchdog.enabled;
    let state = AppState::new(config, transport, store, provider);

    if watchdog_enabled {
        state.watchdog.start().await;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let bot_task = tokio::spawn(bot::run_bot(bot, shutdown_rx, state.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(());
    state.broadcaster.shutdown().await;
    state.watchdog.stop().await;
    if let Err(e) = bot_task.await {
        warn!("Bot task ended abnormally: {}", e);
    }
    info!("Bye");
    Ok(())
}
