use crate::{constants::JUPITER_AGGREGATOR, dex::raydium::amm, error::SniperError};
use anchor_client::solana_sdk::pubkey::Pubkey;
use anyhow::Result;
use serde::Deserialize;
use std::{fs, str::FromStr};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub rpc: Rpc,
    pub bot: BotConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metric: MetricConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    pub url: String,
    pub websocket_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub wallet_path: String,
    pub base_mint: String,
    /// Token account spent on buy. Defaults to the wallet's associated account for `base_mint`.
    pub user_source: Option<String>,
    /// Token account receiving the bought token. Defaults to the wallet's
    /// associated account for the pool's token mint.
    pub user_destination: Option<String>,
    pub buy_amount: u64,
    pub sell_target_percentage: f64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
    #[serde(default = "default_priority_fee")]
    pub default_priority_fee: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    pub amm_program: String,
    pub aggregator_program: String,
    pub markers: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            amm_program: amm::PROGRAM_ID.to_string(),
            aggregator_program: JUPITER_AGGREGATOR.to_string(),
            markers: vec!["InitializeInstruction2".to_string(), "CreatePool".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./pools.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricConfig {
    pub interval_secs: u64,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_compute_unit_limit() -> u32 {
    crate::instructions::DEFAULT_COMPUTE_UNIT_LIMIT
}

fn default_priority_fee() -> u64 {
    crate::instructions::DEFAULT_PRIORITY_FEE
}

pub fn read_config(path: &str) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    Ok(config)
}

/// Parses a base58 address, naming `field` in the error.
pub fn parse_address(field: &'static str, value: &str) -> Result<Pubkey, SniperError> {
    Pubkey::from_str(value.trim()).map_err(|_| SniperError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

pub fn parse_optional_address(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<Pubkey>, SniperError> {
    value.map(|v| parse_address(field, v)).transpose()
}
