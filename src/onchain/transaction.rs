use anchor_client::solana_sdk::{instruction::CompiledInstruction, pubkey::Pubkey};
use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use std::str::FromStr;

/// The parts of a confirmed transaction the listener inspects. Only the
/// static account keys are kept; lookup-table addresses are not resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedTransaction {
    pub signature: String,
    pub account_keys: Vec<Pubkey>,
    pub instructions: Vec<CompiledInstruction>,
}

impl FetchedTransaction {
    pub fn program_of(&self, instruction: &CompiledInstruction) -> Option<Pubkey> {
        self.account_keys
            .get(instruction.program_id_index as usize)
            .copied()
    }
}

pub fn get_transaction_request(signature: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "getTransaction",
        "params": [
            signature,
            {
                "encoding": "json",
                "commitment": "confirmed",
                "maxSupportedTransactionVersion": 0
            }
        ]
    })
}

pub async fn fetch_transaction(
    client: &reqwest::Client,
    rpc_endpoint: &str,
    signature: &str,
) -> Result<Option<FetchedTransaction>> {
    let response: Value = client
        .post(rpc_endpoint)
        .json(&get_transaction_request(signature))
        .send()
        .await?
        .json()
        .await?;

    parse_transaction_response(signature, &response)
}

/// Returns `Ok(None)` when the node does not know the signature yet.
pub fn parse_transaction_response(
    signature: &str,
    response: &Value,
) -> Result<Option<FetchedTransaction>> {
    if let Some(err) = response.get("error") {
        return Err(anyhow!("getTransaction {} failed: {}", signature, err));
    }
    let result = match response.get("result") {
        Some(result) if !result.is_null() => result,
        _ => return Ok(None),
    };

    let message = result
        .get("transaction")
        .and_then(|tx| tx.get("message"))
        .ok_or_else(|| anyhow!("Transaction {} has no message", signature))?;

    let account_keys = message
        .get("accountKeys")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Transaction {} has no account keys", signature))?
        .iter()
        .map(|key| {
            let key = key.as_str().ok_or_else(|| anyhow!("Account key is not a string"))?;
            Pubkey::from_str(key).map_err(|e| anyhow!("Invalid account key {}: {}", key, e))
        })
        .collect::<Result<Vec<_>>>()?;

    let instructions = message
        .get("instructions")
        .and_then(Value::as_array)
        .map(|ixs| ixs.iter().map(parse_compiled_instruction).collect())
        .unwrap_or_else(|| Ok(Vec::new()))?;

    Ok(Some(FetchedTransaction {
        signature: signature.to_string(),
        account_keys,
        instructions,
    }))
}

fn parse_compiled_instruction(ix: &Value) -> Result<CompiledInstruction> {
    let program_id_index = ix
        .get("programIdIndex")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Instruction has no programIdIndex"))?;

    let accounts = ix
        .get("accounts")
        .and_then(Value::as_array)
        .map(|accounts| {
            accounts
                .iter()
                .map(|a| {
                    a.as_u64()
                        .and_then(|a| u8::try_from(a).ok())
                        .ok_or_else(|| anyhow!("Invalid account index {}", a))
                })
                .collect::<Result<Vec<u8>>>()
        })
        .unwrap_or_else(|| Ok(Vec::new()))?;

    let data = match ix.get("data").and_then(Value::as_str) {
        Some(data) => bs58::decode(data).into_vec()?,
        None => Vec::new(),
    };

    Ok(CompiledInstruction {
        program_id_index: u8::try_from(program_id_index)?,
        accounts,
        data,
    })
}
