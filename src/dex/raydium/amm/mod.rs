use anchor_client::solana_sdk::pubkey::Pubkey;

pub mod instruction;
pub mod pool;

pub use instruction::*;
pub use pool::*;

/// HWy1jotHpo6UqeQxx49dpYYdQB8wj9Qk9MdxwjLvDHB8
#[cfg(feature = "devnet")]
pub const PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    245, 104, 43, 6, 252, 203, 219, 166, 180, 13, 35, 74, 20, 177, 247, 222, 157, 139, 94, 17,
    228, 90, 114, 188, 170, 146, 98, 63, 62, 103, 122, 27,
]);

/// 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8
#[cfg(not(feature = "devnet"))]
pub const PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    75, 217, 73, 196, 54, 2, 195, 63, 32, 119, 144, 237, 22, 163, 82, 76, 161, 185, 151, 92, 241,
    33, 162, 169, 12, 255, 236, 125, 248, 182, 138, 205,
]);
