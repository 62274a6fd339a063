use super::instruction::CreatePoolParams;
use crate::{
    constants::{LAMPORTS_PER_SOL, wsol_mint},
    error::{MappingFault, SniperError},
};
use anchor_client::solana_sdk::pubkey::Pubkey;
use ruint::aliases::U256;

/// Semantic role of an account in the pool-creation instruction, paired with
/// its position in the instruction's account index list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountRole {
    AmmId,
    AmmAuthority,
    AmmOpenOrders,
    LpMint,
    TokenMint,
    QuoteMint,
    TokenVault,
    QuoteVault,
    TargetOrders,
    MarketProgram,
    MarketId,
    Deployer,
    MarketBaseVault,
    MarketQuoteVault,
    MarketAuthority,
    MarketEventQueue,
    MarketBids,
    MarketAsks,
}

impl AccountRole {
    pub const ALL: [AccountRole; 18] = [
        AccountRole::AmmId,
        AccountRole::AmmAuthority,
        AccountRole::AmmOpenOrders,
        AccountRole::LpMint,
        AccountRole::TokenMint,
        AccountRole::QuoteMint,
        AccountRole::TokenVault,
        AccountRole::QuoteVault,
        AccountRole::TargetOrders,
        AccountRole::MarketProgram,
        AccountRole::MarketId,
        AccountRole::Deployer,
        AccountRole::MarketBaseVault,
        AccountRole::MarketQuoteVault,
        AccountRole::MarketAuthority,
        AccountRole::MarketEventQueue,
        AccountRole::MarketBids,
        AccountRole::MarketAsks,
    ];

    /// Position inside the instruction's account index list. These must move
    /// in lockstep with the on-chain program's account order.
    pub const fn offset(self) -> usize {
        match self {
            AccountRole::AmmId => 4,
            AccountRole::AmmAuthority => 5,
            AccountRole::AmmOpenOrders => 6,
            AccountRole::LpMint => 7,
            AccountRole::TokenMint => 8,
            AccountRole::QuoteMint => 9,
            AccountRole::TokenVault => 10,
            AccountRole::QuoteVault => 11,
            AccountRole::TargetOrders => 13,
            AccountRole::MarketProgram => 15,
            AccountRole::MarketId => 16,
            AccountRole::Deployer => 17,
            AccountRole::MarketBaseVault => 18,
            AccountRole::MarketQuoteVault => 19,
            AccountRole::MarketAuthority => 20,
            AccountRole::MarketEventQueue => 21,
            AccountRole::MarketBids => 22,
            AccountRole::MarketAsks => 23,
        }
    }
}

/// Smallest index list the role table can be resolved against.
pub const REQUIRED_ACCOUNT_INDICES: usize = 24;

/// Order-book market the AMM settles against; the swap instruction needs all of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketAccounts {
    pub program_id: Pubkey,
    pub id: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub event_queue: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub authority: Pubkey,
}

/// Everything needed to trade against one newly created pool.
///
/// Built once by [`build_pool_descriptor`] and never mutated afterwards.
/// After construction `quote_mint`/`quote_vault` hold the wrapped SOL side
/// whenever the pool has one.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolDescriptor {
    pub program_id: Pubkey,
    pub amm_id: Pubkey,
    pub amm_authority: Pubkey,
    pub amm_open_orders: Pubkey,
    pub lp_mint: Pubkey,
    pub token_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub token_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub target_orders: Pubkey,
    pub deployer: Pubkey,
    pub market: MarketAccounts,
    pub nonce: u8,
    pub open_time: u64,
    pub init_pc_amount: u64,
    pub init_coin_amount: u64,
    /// `init_pc_amount * init_coin_amount`, exact.
    pub k: U256,
    /// `min(reserves) / max(reserves)`, before any price scaling.
    pub price_ratio: f64,
}

impl PoolDescriptor {
    pub fn is_native_paired(&self) -> bool {
        let wsol = wsol_mint();
        (self.token_mint == wsol) != (self.quote_mint == wsol)
    }

    /// Puts the wrapped SOL side in the quote slot. Mint and vault move together.
    fn normalize_mints(&mut self) -> bool {
        if self.token_mint != wsol_mint() {
            return false;
        }
        std::mem::swap(&mut self.token_mint, &mut self.quote_mint);
        std::mem::swap(&mut self.token_vault, &mut self.quote_vault);
        true
    }

    pub fn initial_price(&self, scale: &PriceScale) -> f64 {
        self.price_ratio / scale.ratio_divisor
    }
}

pub fn invariant_k(init_pc_amount: u64, init_coin_amount: u64) -> U256 {
    U256::from(init_pc_amount) * U256::from(init_coin_amount)
}

pub fn price_ratio(reserve_a: u64, reserve_b: u64) -> Option<f64> {
    let (low, high) = if reserve_a <= reserve_b {
        (reserve_a, reserve_b)
    } else {
        (reserve_b, reserve_a)
    };
    if low == 0 {
        return None;
    }
    Some(low as f64 / high as f64)
}

pub fn u256_to_f64(value: &U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, &limb| acc * 18_446_744_073_709_551_616.0 + limb as f64)
}

/// `reserve / (K / reserve)`, i.e. `reserve² / K`.
// NOTE: this is not the usual `other_reserve / reserve` spot price. Every sell
// threshold is calibrated against it, so changing it means recalibrating those.
pub fn constant_product_price(reserve: f64, k: f64) -> f64 {
    let other = k / reserve;
    reserve / other
}

/// Divisors applied before prices are compared.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceScale {
    /// Applied to the vault balance (lamports to SOL).
    pub reserve_divisor: f64,
    pub k_divisor: f64,
    /// Applied to the min/max reserve ratio to obtain V.
    pub ratio_divisor: f64,
}

impl PriceScale {
    pub const UNIT: PriceScale = PriceScale {
        reserve_divisor: 1.0,
        k_divisor: 1.0,
        ratio_divisor: 1.0,
    };

    pub fn reserve(&self, raw: u64) -> f64 {
        raw as f64 / self.reserve_divisor
    }

    pub fn invariant(&self, k: &U256) -> f64 {
        u256_to_f64(k) / self.k_divisor
    }
}

impl Default for PriceScale {
    fn default() -> Self {
        Self {
            reserve_divisor: LAMPORTS_PER_SOL as f64,
            k_divisor: 1e15,
            ratio_divisor: 1000.0,
        }
    }
}

fn resolve(
    role: AccountRole,
    account_keys: &[Pubkey],
    indices: &[u8],
) -> Result<Pubkey, SniperError> {
    let index = indices[role.offset()] as usize;
    account_keys
        .get(index)
        .copied()
        .ok_or(SniperError::AccountMapping(MappingFault::UnresolvedKey { role, index }))
}

/// Maps the create-pool instruction's accounts onto a [`PoolDescriptor`].
///
/// `account_keys` is the transaction's static account list and `indices` the
/// instruction's own index list into it.
pub fn build_pool_descriptor(
    program_id: Pubkey,
    params: &CreatePoolParams,
    account_keys: &[Pubkey],
    indices: &[u8],
) -> Result<PoolDescriptor, SniperError> {
    if indices.len() < REQUIRED_ACCOUNT_INDICES {
        return Err(SniperError::AccountMapping(MappingFault::TooFewIndices {
            required: REQUIRED_ACCOUNT_INDICES,
            actual: indices.len(),
        }));
    }

    let price_ratio = price_ratio(params.init_pc_amount, params.init_coin_amount).ok_or_else(
        || {
            SniperError::MalformedInstruction(format!(
                "initial reserves must be non-zero (pc {}, coin {})",
                params.init_pc_amount, params.init_coin_amount
            ))
        },
    )?;

    let key = |role| resolve(role, account_keys, indices);

    let mut descriptor = PoolDescriptor {
        program_id,
        amm_id: key(AccountRole::AmmId)?,
        amm_authority: key(AccountRole::AmmAuthority)?,
        amm_open_orders: key(AccountRole::AmmOpenOrders)?,
        lp_mint: key(AccountRole::LpMint)?,
        token_mint: key(AccountRole::TokenMint)?,
        quote_mint: key(AccountRole::QuoteMint)?,
        token_vault: key(AccountRole::TokenVault)?,
        quote_vault: key(AccountRole::QuoteVault)?,
        target_orders: key(AccountRole::TargetOrders)?,
        deployer: key(AccountRole::Deployer)?,
        market: MarketAccounts {
            program_id: key(AccountRole::MarketProgram)?,
            id: key(AccountRole::MarketId)?,
            bids: key(AccountRole::MarketBids)?,
            asks: key(AccountRole::MarketAsks)?,
            event_queue: key(AccountRole::MarketEventQueue)?,
            base_vault: key(AccountRole::MarketBaseVault)?,
            quote_vault: key(AccountRole::MarketQuoteVault)?,
            authority: key(AccountRole::MarketAuthority)?,
        },
        nonce: params.nonce,
        open_time: params.open_time,
        init_pc_amount: params.init_pc_amount,
        init_coin_amount: params.init_coin_amount,
        k: invariant_k(params.init_pc_amount, params.init_coin_amount),
        price_ratio,
    };
    descriptor.normalize_mints();

    Ok(descriptor)
}
