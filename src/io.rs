use anchor_client::solana_sdk::signature::{Keypair, read_keypair_file};
use anyhow::{Result, anyhow, bail};
use std::fs;

const SECRET_KEY_LEN: usize = 64;

/// Base58 encoded 64-byte secret, as exported by most wallets.
pub fn keypair_from_bs58(secret: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret.trim()).into_vec()?;
    if bytes.len() != SECRET_KEY_LEN {
        bail!("Invalid secret key: expected {} bytes, got {}", SECRET_KEY_LEN, bytes.len());
    }
    Keypair::from_bytes(&bytes).map_err(|e| anyhow!("Invalid secret key: {}", e))
}

/// Loads the wallet from a JSON keypair file, falling back to a file holding a base58 secret.
pub fn load_keypair(path: &str) -> Result<Keypair> {
    match read_keypair_file(path) {
        Ok(keypair) => Ok(keypair),
        Err(_) => {
            let content = fs::read_to_string(path)
                .map_err(|e| anyhow!("Cannot read wallet {}: {}", path, e))?;
            keypair_from_bs58(&content)
        }
    }
}
