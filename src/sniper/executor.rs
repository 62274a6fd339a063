use crate::{
    dex::raydium::amm::{PoolDescriptor, SwapAccounts, build_swap_instruction, writable_accounts},
    error::SniperError,
    instructions::{budget_instructions, estimate_priority_fee},
    onchain::{ChainRpc, send::send_and_confirm},
};
use anchor_client::solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use spl_token::amount_to_ui_amount_string_trimmed;
use std::sync::Arc;
use tracing::info;

/// The wallet's token accounts for one position, in buy direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeAccounts {
    /// Spent on buy, credited on sell.
    pub source: Pubkey,
    /// Credited on buy, spent on sell.
    pub destination: Pubkey,
}

impl TradeAccounts {
    pub fn reversed(&self) -> Self {
        Self {
            source: self.destination,
            destination: self.source,
        }
    }
}

/// Builds, signs and submits swaps against a pool. Every call is a single
/// attempt; retry policy belongs to the caller.
pub struct TradeExecutor {
    chain: Arc<dyn ChainRpc>,
    payer: Arc<Keypair>,
    compute_unit_limit: u32,
    default_priority_fee: u64,
}

impl TradeExecutor {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        payer: Arc<Keypair>,
        compute_unit_limit: u32,
        default_priority_fee: u64,
    ) -> Self {
        Self {
            chain,
            payer,
            compute_unit_limit,
            default_priority_fee,
        }
    }

    pub fn chain(&self) -> Arc<dyn ChainRpc> {
        self.chain.clone()
    }

    pub fn owner(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub async fn buy(
        &self,
        pool: &PoolDescriptor,
        accounts: &TradeAccounts,
        amount: u64,
    ) -> Result<Signature, SniperError> {
        info!("🛒 Buying {} of {} in pool {}", amount, pool.token_mint, pool.amm_id);
        self.swap(pool, accounts, amount, true).await
    }

    pub async fn sell(
        &self,
        pool: &PoolDescriptor,
        accounts: &TradeAccounts,
        amount: u64,
    ) -> Result<Signature, SniperError> {
        info!("💰 Selling {} of {} in pool {}", amount, pool.token_mint, pool.amm_id);
        self.swap(pool, &accounts.reversed(), amount, false).await
    }

    pub async fn swap(
        &self,
        pool: &PoolDescriptor,
        accounts: &TradeAccounts,
        amount: u64,
        swap_base_in: bool,
    ) -> Result<Signature, SniperError> {
        validate_address("amm_id", &pool.amm_id)?;
        validate_address("quote_vault", &pool.quote_vault)?;
        validate_address("market_id", &pool.market.id)?;
        validate_address("user_source", &accounts.source)?;
        validate_address("user_destination", &accounts.destination)?;

        self.ensure_balance(&accounts.source, amount).await?;

        let user = SwapAccounts {
            owner: self.owner(),
            source: accounts.source,
            destination: accounts.destination,
        };
        let swap_ix = build_swap_instruction(pool, &user, amount, swap_base_in);
        let priority_fee = estimate_priority_fee(
            self.chain.as_ref(),
            &writable_accounts(&swap_ix),
            self.default_priority_fee,
        )
        .await;

        let [limit_ix, price_ix] = budget_instructions(self.compute_unit_limit, priority_fee);
        send_and_confirm(self.chain.as_ref(), &self.payer, &[limit_ix, price_ix, swap_ix]).await
    }

    /// Fails with [`SniperError::InsufficientBalance`] if `account` holds less than `required`.
    pub async fn ensure_balance(&self, account: &Pubkey, required: u64) -> Result<(), SniperError> {
        let balance = self
            .chain
            .get_token_balance(account)
            .await
            .map_err(|e| SniperError::execution("balance", e))?;
        info!(
            "Current balance: {} tokens",
            amount_to_ui_amount_string_trimmed(balance.amount, balance.decimals)
        );

        if balance.amount < required {
            return Err(SniperError::InsufficientBalance {
                required: amount_to_ui_amount_string_trimmed(required, balance.decimals),
                available: amount_to_ui_amount_string_trimmed(balance.amount, balance.decimals),
            });
        }
        Ok(())
    }
}

/// Rejects the all-zero key, which is what an unset address parses to.
pub fn validate_address(field: &'static str, key: &Pubkey) -> Result<(), SniperError> {
    if *key == Pubkey::default() {
        return Err(SniperError::InvalidAddress {
            field,
            value: key.to_string(),
        });
    }
    Ok(())
}
