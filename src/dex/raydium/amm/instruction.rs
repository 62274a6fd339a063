use super::pool::PoolDescriptor;
use crate::{byte_reader::ByteReader, error::SniperError};
use anchor_client::solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

/// Byte length of the pool-creation payload this decoder understands.
pub const CREATE_POOL_DATA_LEN: usize = 26;

pub const SWAP_BASE_IN_OPCODE: u8 = 9;
pub const SWAP_BASE_OUT_OPCODE: u8 = 10;
pub const SWAP_DATA_LEN: usize = 9;
pub const SWAP_ACCOUNTS_LEN: usize = 16;

/// Numeric fields of the AMM "create pool" instruction.
///
/// Layout: `[0] discriminator`, `[1] nonce`, `[2..10] open_time`,
/// `[10..18] init_pc_amount`, `[18..26] init_coin_amount`, little endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreatePoolParams {
    pub discriminator: u8,
    pub nonce: u8,
    pub open_time: u64,
    /// Quote side reserve at creation.
    pub init_pc_amount: u64,
    /// Base side reserve at creation.
    pub init_coin_amount: u64,
}

impl CreatePoolParams {
    pub fn decode(data: &[u8]) -> Result<Self, SniperError> {
        if data.len() < CREATE_POOL_DATA_LEN {
            return Err(SniperError::MalformedInstruction(format!(
                "create pool payload is {} bytes, expected at least {}",
                data.len(),
                CREATE_POOL_DATA_LEN
            )));
        }

        let mut reader = ByteReader::new(data);
        let read = |e: anyhow::Error| SniperError::MalformedInstruction(e.to_string());

        Ok(Self {
            discriminator: reader.read_u8().map_err(read)?,
            nonce: reader.read_u8().map_err(read)?,
            open_time: reader.read_u64().map_err(read)?,
            init_pc_amount: reader.read_u64().map_err(read)?,
            init_coin_amount: reader.read_u64().map_err(read)?,
        })
    }

    pub fn encode(&self) -> [u8; CREATE_POOL_DATA_LEN] {
        let mut data = [0u8; CREATE_POOL_DATA_LEN];
        data[0] = self.discriminator;
        data[1] = self.nonce;
        data[2..10].copy_from_slice(&self.open_time.to_le_bytes());
        data[10..18].copy_from_slice(&self.init_pc_amount.to_le_bytes());
        data[18..26].copy_from_slice(&self.init_coin_amount.to_le_bytes());
        data
    }
}

/// Wallet side of a swap: the signer and the two token accounts it moves between.
#[derive(Clone, Copy, Debug)]
pub struct SwapAccounts {
    pub owner: Pubkey,
    pub source: Pubkey,
    pub destination: Pubkey,
}

pub fn encode_swap_data(amount: u64, swap_base_in: bool) -> [u8; SWAP_DATA_LEN] {
    let mut data = [0u8; SWAP_DATA_LEN];
    data[0] = if swap_base_in {
        SWAP_BASE_IN_OPCODE
    } else {
        SWAP_BASE_OUT_OPCODE
    };
    data[1..].copy_from_slice(&amount.to_le_bytes());
    data
}

pub fn build_swap_accounts(pool: &PoolDescriptor, user: &SwapAccounts) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new(pool.amm_id, false),
        AccountMeta::new_readonly(pool.amm_authority, false),
        AccountMeta::new(pool.amm_open_orders, false),
        AccountMeta::new(pool.token_vault, false),
        AccountMeta::new(pool.quote_vault, false),
        AccountMeta::new_readonly(pool.market.program_id, false),
        AccountMeta::new(pool.market.id, false),
        AccountMeta::new(pool.market.bids, false),
        AccountMeta::new(pool.market.asks, false),
        AccountMeta::new(pool.market.event_queue, false),
        AccountMeta::new(pool.market.base_vault, false),
        AccountMeta::new(pool.market.quote_vault, false),
        AccountMeta::new_readonly(pool.market.authority, false),
        AccountMeta::new(user.source, false),
        AccountMeta::new(user.destination, false),
        AccountMeta::new_readonly(user.owner, true),
    ]
}

pub fn build_swap_instruction(
    pool: &PoolDescriptor,
    user: &SwapAccounts,
    amount: u64,
    swap_base_in: bool,
) -> Instruction {
    Instruction {
        program_id: pool.program_id,
        accounts: build_swap_accounts(pool, user),
        data: encode_swap_data(amount, swap_base_in).to_vec(),
    }
}

/// Accounts the swap locks for write, which is what prioritization fees are sampled on.
pub fn writable_accounts(instruction: &Instruction) -> Vec<Pubkey> {
    instruction
        .accounts
        .iter()
        .filter(|meta| meta.is_writable)
        .map(|meta| meta.pubkey)
        .collect()
}
