use anchor_client::solana_sdk::signer::Signer;
use anyhow::Result;
use spl_associated_token_account::get_associated_token_address;
use std::{sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

pub mod byte_reader;
pub mod cache;
pub mod config;
pub mod constants;
pub mod dex;
pub mod error;
pub mod instructions;
pub mod io;
pub mod listener;
pub mod metric;
pub mod onchain;
pub mod sniper;
pub mod store;

pub use constants::*;

use config::{parse_address, parse_optional_address};
use dex::raydium::amm::PriceScale;
use listener::LpListener;
use onchain::{ChainRpc, SolanaChain};
use sniper::{PositionConfig, PositionEvent, SniperManager, TradeAccounts, TradeExecutor};
use store::{JsonlPoolStore, PoolStore};

#[cfg(feature = "devnet")]
const CONFIG_PATH: &str = "config_dev.toml";

#[cfg(not(feature = "devnet"))]
const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("Raydium LP sniper running...");
    let conf = config::read_config(CONFIG_PATH)?;

    let payer = Arc::new(io::load_keypair(&conf.bot.wallet_path)?);
    let wallet = payer.pubkey();
    let base_mint = parse_address("base_mint", &conf.bot.base_mint)?;
    let user_source = parse_optional_address("user_source", conf.bot.user_source.as_deref())?
        .unwrap_or_else(|| get_associated_token_address(&wallet, &base_mint));
    let user_destination =
        parse_optional_address("user_destination", conf.bot.user_destination.as_deref())?;
    let amm_program = parse_address("amm_program", &conf.listener.amm_program)?;
    let aggregator_program = parse_address("aggregator_program", &conf.listener.aggregator_program)?;
    info!("Wallet {} - base mint {} - source {}", wallet, base_mint, user_source);

    let chain: Arc<dyn ChainRpc> = Arc::new(SolanaChain::new(&conf.rpc.url, &conf.rpc.websocket_url));
    let store: Arc<dyn PoolStore> = Arc::new(JsonlPoolStore::new(&conf.store.path));
    let scale = PriceScale::default();

    let executor = Arc::new(TradeExecutor::new(
        chain.clone(),
        payer,
        conf.bot.compute_unit_limit,
        conf.bot.default_priority_fee,
    ));
    let manager = SniperManager::new(
        executor,
        Duration::from_secs(conf.bot.poll_interval_secs),
        scale,
    );
    let listener = Arc::new(LpListener::new(
        chain,
        store,
        amm_program,
        aggregator_program,
        conf.listener.markers.clone(),
        scale,
    ));

    let (pool_tx, mut pool_rx) = mpsc::unbounded_channel();
    let listener_task = tokio::spawn(listener.clone().run_with_retry(pool_tx));
    metric::start(conf.metric.interval_secs, manager.clone(), listener);
    tokio::spawn(log_events(manager.subscribe_events()));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut listener_stopped = false;
    loop {
        tokio::select! {
            pool = pool_rx.recv() => {
                let Some(pool) = pool else {
                    listener_stopped = true;
                    break;
                };
                let destination = user_destination
                    .unwrap_or_else(|| get_associated_token_address(&wallet, &pool.token_mint));
                let position = PositionConfig {
                    pool: Arc::new(pool),
                    accounts: TradeAccounts {
                        source: user_source,
                        destination,
                    },
                    buy_amount: conf.bot.buy_amount,
                    sell_target_percentage: conf.bot.sell_target_percentage,
                };
                let manager = manager.clone();
                tokio::spawn(async move {
                    let pool_id = position.pool.amm_id;
                    if let Err(e) = manager.add_position(position).await {
                        warn!("⚠️ No position opened for pool {}: {}", pool_id, e);
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    if listener_stopped {
        // open positions keep their own watchers
        warn!(
            "🔌 Listener stopped, watching {} open positions until shutdown",
            manager.len()
        );
        let _ = shutdown.await;
    }
    info!("Shutting down...");
    listener_task.abort();
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<PositionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if event.to.is_terminal() => match &event.error {
                Some(cause) => warn!(
                    "🏁 Position {} (pool {}) closed {} -> {}: {}",
                    event.handle, event.pool, event.from, event.to, cause
                ),
                None => info!(
                    "🏁 Position {} (pool {}) closed {} -> {}",
                    event.handle, event.pool, event.from, event.to
                ),
            },
            Ok(event) => info!(
                "🔁 Position {} (pool {}): {} -> {}",
                event.handle, event.pool, event.from, event.to
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("⚠️ Missed {} position events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
