use crate::onchain::{ChainRpc, FeeSample};
use anchor_client::solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

pub const DEFAULT_PRIORITY_FEE: u64 = 1_000;

/// Most recent sample plus a 30% margin, floored to whole micro-lamports.
pub fn inflate_latest(samples: &[FeeSample]) -> Option<u64> {
    let latest = samples.iter().max_by_key(|sample| sample.slot)?;
    let fee = latest.prioritization_fee as u128;
    let inflated = fee + fee * 3 / 10;
    Some(u64::try_from(inflated).unwrap_or(u64::MAX))
}

/// Priority fee in micro-lamports per compute unit for a transaction that
/// write-locks `accounts`. Falls back to `default_fee` when the node has no
/// samples or the query fails.
pub async fn estimate_priority_fee(
    chain: &dyn ChainRpc,
    accounts: &[Pubkey],
    default_fee: u64,
) -> u64 {
    match chain.get_recent_prioritization_fees(accounts).await {
        Ok(samples) => match inflate_latest(&samples) {
            Some(fee) => {
                debug!("⛽ Priority fee {} from {} samples", fee, samples.len());
                fee
            }
            None => default_fee,
        },
        Err(e) => {
            warn!("⚠️ Priority fee query failed, using default {}: {}", default_fee, e);
            default_fee
        }
    }
}
