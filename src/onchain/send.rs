use super::ChainRpc;
use crate::error::SniperError;
use anchor_client::solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};
use tracing::{debug, info};

pub fn build_signed_transaction(
    payer: &Keypair,
    instructions: &[Instruction],
    blockhash: Hash,
) -> Transaction {
    Transaction::new_signed_with_payer(instructions, Some(&payer.pubkey()), &[payer], blockhash)
}

/// Signs with `payer`, submits once and waits for confirmation. Nothing is
/// resubmitted on failure.
pub async fn send_and_confirm(
    chain: &dyn ChainRpc,
    payer: &Keypair,
    instructions: &[Instruction],
) -> Result<Signature, SniperError> {
    let blockhash = chain
        .get_latest_blockhash()
        .await
        .map_err(|e| SniperError::execution("blockhash", e))?;
    let tx = build_signed_transaction(payer, instructions, blockhash);

    let signature = chain
        .send_transaction(&tx)
        .await
        .map_err(|e| SniperError::execution("submit", e))?;
    debug!("📤 Submitted {}", signature);

    chain
        .confirm_transaction(&signature)
        .await
        .map_err(|e| SniperError::execution("confirm", e))?;
    info!("✅ Transaction confirmed: {}", signature);

    Ok(signature)
}
