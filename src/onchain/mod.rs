use anchor_client::{
    solana_client::{
        nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig,
    },
    solana_sdk::{
        commitment_config::{CommitmentConfig, CommitmentLevel},
        hash::Hash,
        pubkey::Pubkey,
        signature::Signature,
        transaction::Transaction,
    },
};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

#[cfg(test)]
pub mod mock;
pub mod pubsub;
pub mod send;
pub mod transaction;

pub use pubsub::PubsubClient;
pub use transaction::FetchedTransaction;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONFIRM_MAX_POLLS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBalance {
    pub amount: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSample {
    pub slot: u64,
    pub prioritization_fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub signature: String,
    pub logs: Vec<String>,
    pub failed: bool,
}

/// Lamport balance updates for one account. The receiver closes when the
/// underlying connection goes away.
pub struct AccountSubscription {
    pub id: u64,
    pub updates: mpsc::UnboundedReceiver<u64>,
}

pub struct LogSubscription {
    pub id: u64,
    pub notifications: mpsc::UnboundedReceiver<LogNotification>,
}

/// Everything the bot asks of the cluster.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_lamports(&self, address: &Pubkey) -> Result<u64>;
    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<TokenBalance>;
    async fn get_latest_blockhash(&self) -> Result<Hash>;
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature>;
    /// Resolves once the signature reaches confirmed commitment, or fails if
    /// the transaction errored or never landed.
    async fn confirm_transaction(&self, signature: &Signature) -> Result<()>;
    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<FeeSample>>;
    async fn get_transaction(&self, signature: &str) -> Result<Option<FetchedTransaction>>;
    async fn subscribe_account(&self, address: &Pubkey) -> Result<AccountSubscription>;
    async fn unsubscribe_account(&self, id: u64) -> Result<()>;
    async fn subscribe_logs(&self, program: &Pubkey) -> Result<LogSubscription>;
}

pub struct SolanaChain {
    rpc: RpcClient,
    http: reqwest::Client,
    rpc_url: String,
    websocket_url: String,
    pubsub: Mutex<Option<PubsubClient>>,
}

impl SolanaChain {
    pub fn new(rpc_url: &str, websocket_url: &str) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()),
            http: reqwest::Client::new(),
            rpc_url: rpc_url.to_string(),
            websocket_url: websocket_url.to_string(),
            pubsub: Mutex::new(None),
        }
    }

    /// Shared websocket connection, re-established after it drops.
    async fn pubsub(&self) -> Result<PubsubClient> {
        let mut guard = self.pubsub.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            warn!("🔄 WebSocket connection lost, reconnecting to {}", self.websocket_url);
        }
        let client = PubsubClient::connect(&self.websocket_url).await?;
        *guard = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ChainRpc for SolanaChain {
    async fn get_lamports(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.rpc.get_balance(address).await?)
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<TokenBalance> {
        let balance = self.rpc.get_token_account_balance(token_account).await?;
        let amount = balance
            .amount
            .parse::<u64>()
            .map_err(|e| anyhow!("Invalid token amount {}: {}", balance.amount, e))?;
        Ok(TokenBalance {
            amount,
            decimals: balance.decimals,
        })
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(self.rpc.get_latest_blockhash().await?)
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let signature = self
            .rpc
            .send_transaction_with_config(
                transaction,
                RpcSendTransactionConfig {
                    skip_preflight: false,
                    preflight_commitment: Some(CommitmentLevel::Confirmed),
                    max_retries: Some(3),
                    ..Default::default()
                },
            )
            .await?;
        Ok(signature)
    }

    async fn confirm_transaction(&self, signature: &Signature) -> Result<()> {
        let commitment = CommitmentConfig::confirmed();
        for _ in 0..CONFIRM_MAX_POLLS {
            let statuses = self.rpc.get_signature_statuses(&[*signature]).await?;
            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    bail!("Transaction {} failed: {}", signature, err);
                }
                if status.satisfies_commitment(commitment) {
                    return Ok(());
                }
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
        bail!("Transaction {} was not confirmed in time", signature)
    }

    async fn get_recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<FeeSample>> {
        let fees = self.rpc.get_recent_prioritization_fees(accounts).await?;
        Ok(fees
            .into_iter()
            .map(|fee| FeeSample {
                slot: fee.slot,
                prioritization_fee: fee.prioritization_fee,
            })
            .collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<FetchedTransaction>> {
        transaction::fetch_transaction(&self.http, &self.rpc_url, signature).await
    }

    async fn subscribe_account(&self, address: &Pubkey) -> Result<AccountSubscription> {
        let client = self.pubsub().await?;
        let (id, mut raw) = client
            .subscribe(
                "accountSubscribe",
                json!([address.to_string(), { "encoding": "base64", "commitment": "confirmed" }]),
            )
            .await?;

        let (tx, updates) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(notification) = raw.recv().await {
                match parse_account_lamports(&notification) {
                    Some(lamports) => {
                        if tx.send(lamports).is_err() {
                            break;
                        }
                    }
                    None => debug!("Unparseable account notification: {}", notification),
                }
            }
        });

        Ok(AccountSubscription { id, updates })
    }

    async fn unsubscribe_account(&self, id: u64) -> Result<()> {
        let client = self.pubsub().await?;
        client.unsubscribe("accountUnsubscribe", id).await
    }

    async fn subscribe_logs(&self, program: &Pubkey) -> Result<LogSubscription> {
        let client = self.pubsub().await?;
        let (id, mut raw) = client
            .subscribe(
                "logsSubscribe",
                json!([{ "mentions": [program.to_string()] }, { "commitment": "confirmed" }]),
            )
            .await?;

        let (tx, notifications) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(notification) = raw.recv().await {
                if let Some(logs) = parse_log_notification(&notification) {
                    if tx.send(logs).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(LogSubscription { id, notifications })
    }
}

pub fn parse_account_lamports(notification: &Value) -> Option<u64> {
    notification.get("value")?.get("lamports")?.as_u64()
}

pub fn parse_log_notification(notification: &Value) -> Option<LogNotification> {
    let value = notification.get("value")?;
    let signature = value.get("signature")?.as_str()?;
    if signature.is_empty() {
        return None;
    }
    let logs = value
        .get("logs")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let failed = value.get("err").is_some_and(|err| !err.is_null());

    Some(LogNotification {
        signature: signature.to_string(),
        logs,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_lamports_from_account_notification() {
        let notification = json!({
            "context": { "slot": 5 },
            "value": { "lamports": 33594, "owner": "11111111111111111111111111111111" }
        });
        assert_eq!(parse_account_lamports(&notification), Some(33594));
        assert_eq!(parse_account_lamports(&json!({ "value": null })), None);
    }

    #[test]
    fn extracts_signature_and_logs() {
        let notification = json!({
            "context": { "slot": 5 },
            "value": {
                "signature": "5h6x",
                "err": null,
                "logs": ["Program log: initialize2: InitializeInstruction2 { nonce: 254 }"]
            }
        });
        let parsed = parse_log_notification(&notification).unwrap();
        assert_eq!(parsed.signature, "5h6x");
        assert_eq!(parsed.logs.len(), 1);
        assert!(!parsed.failed);

        let failed = json!({
            "value": { "signature": "abc", "err": { "InstructionError": [0, "Custom"] }, "logs": [] }
        });
        assert!(parse_log_notification(&failed).unwrap().failed);

        let empty = json!({ "value": { "signature": "", "logs": [] } });
        assert!(parse_log_notification(&empty).is_none());
    }
}
