use crate::{
    constants::{ASSOCIATED_TOKEN_PROGRAM, SYSTEM_PROGRAM, TOKEN_PROGRAM},
    dex::raydium::amm::PoolDescriptor,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, error};

/// Flat, string-keyed snapshot of a discovered pool.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolRecord {
    pub amm_program: String,
    pub amm_id: String,
    pub amm_authority: String,
    pub amm_open_orders: String,
    pub lp_mint: String,
    pub token_mint: String,
    pub quote_mint: String,
    pub token_vault: String,
    pub quote_vault: String,
    pub target_orders: String,
    pub deployer: String,
    pub market_program: String,
    pub market_id: String,
    pub market_bids: String,
    pub market_asks: String,
    pub market_event_queue: String,
    pub market_base_vault: String,
    pub market_quote_vault: String,
    pub market_authority: String,
    pub system_program: String,
    pub token_program: String,
    pub associated_token_program: String,
    pub nonce: u8,
    pub open_time: u64,
    pub init_pc_amount: u64,
    pub init_coin_amount: u64,
    /// Decimal string; the product does not fit a JSON number.
    pub k: String,
    pub v: f64,
    pub signature: String,
    pub detected_at: DateTime<Utc>,
}

impl PoolRecord {
    pub fn new(pool: &PoolDescriptor, signature: &str, v: f64) -> Self {
        Self {
            amm_program: pool.program_id.to_string(),
            amm_id: pool.amm_id.to_string(),
            amm_authority: pool.amm_authority.to_string(),
            amm_open_orders: pool.amm_open_orders.to_string(),
            lp_mint: pool.lp_mint.to_string(),
            token_mint: pool.token_mint.to_string(),
            quote_mint: pool.quote_mint.to_string(),
            token_vault: pool.token_vault.to_string(),
            quote_vault: pool.quote_vault.to_string(),
            target_orders: pool.target_orders.to_string(),
            deployer: pool.deployer.to_string(),
            market_program: pool.market.program_id.to_string(),
            market_id: pool.market.id.to_string(),
            market_bids: pool.market.bids.to_string(),
            market_asks: pool.market.asks.to_string(),
            market_event_queue: pool.market.event_queue.to_string(),
            market_base_vault: pool.market.base_vault.to_string(),
            market_quote_vault: pool.market.quote_vault.to_string(),
            market_authority: pool.market.authority.to_string(),
            system_program: SYSTEM_PROGRAM.to_string(),
            token_program: TOKEN_PROGRAM.to_string(),
            associated_token_program: ASSOCIATED_TOKEN_PROGRAM.to_string(),
            nonce: pool.nonce,
            open_time: pool.open_time,
            init_pc_amount: pool.init_pc_amount,
            init_coin_amount: pool.init_coin_amount,
            k: pool.k.to_string(),
            v,
            signature: signature.to_string(),
            detected_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn insert_one(&self, record: &PoolRecord) -> Result<()>;
}

/// Appends one JSON document per line.
pub struct JsonlPoolStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlPoolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl PoolStore for JsonlPoolStore {
    async fn insert_one(&self, record: &PoolRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Writes in the background. A failed write is logged and never reaches the caller.
pub fn persist_detached(store: Arc<dyn PoolStore>, record: PoolRecord) {
    tokio::spawn(async move {
        match store.insert_one(&record).await {
            Ok(()) => debug!("💾 Stored pool {}", record.amm_id),
            Err(e) => error!("❌ Failed to store pool {}: {}", record.amm_id, e),
        }
    });
}
