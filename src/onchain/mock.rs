use super::{
    AccountSubscription, ChainRpc, FeeSample, FetchedTransaction, LogNotification,
    LogSubscription, TokenBalance,
};
use anchor_client::solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction,
};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
use tokio::sync::mpsc;

/// In-memory cluster used by unit tests.
#[derive(Default)]
pub struct MockChain {
    lamports: Mutex<HashMap<Pubkey, u64>>,
    token_balances: Mutex<HashMap<Pubkey, TokenBalance>>,
    fees: Mutex<Vec<FeeSample>>,
    fail_fees: AtomicBool,
    transactions: Mutex<HashMap<String, FetchedTransaction>>,
    fetches: AtomicUsize,
    sent: Mutex<Vec<Transaction>>,
    fail_confirm: AtomicBool,
    next_subscription: AtomicU64,
    account_subscriptions: Mutex<HashMap<u64, (Pubkey, mpsc::UnboundedSender<u64>)>>,
    unsubscribed: Mutex<Vec<u64>>,
    log_subscribers: Mutex<Vec<mpsc::UnboundedSender<LogNotification>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lamports(&self, address: Pubkey, lamports: u64) {
        self.lamports.lock().insert(address, lamports);
    }

    pub fn set_token_balance(&self, account: Pubkey, amount: u64, decimals: u8) {
        self.token_balances
            .lock()
            .insert(account, TokenBalance { amount, decimals });
    }

    pub fn set_fees(&self, fees: Vec<FeeSample>) {
        *self.fees.lock() = fees;
    }

    pub fn fail_fee_queries(&self, fail: bool) {
        self.fail_fees.store(fail, Ordering::SeqCst);
    }

    pub fn fail_confirmations(&self, fail: bool) {
        self.fail_confirm.store(fail, Ordering::SeqCst);
    }

    pub fn add_transaction(&self, tx: FetchedTransaction) {
        self.transactions.lock().insert(tx.signature.clone(), tx);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    /// Updates the balance and pushes it to every live subscription on `address`.
    pub fn push_account_update(&self, address: Pubkey, lamports: u64) {
        self.set_lamports(address, lamports);
        let subscriptions = self.account_subscriptions.lock();
        for (subscribed, tx) in subscriptions.values() {
            if *subscribed == address {
                let _ = tx.send(lamports);
            }
        }
    }

    /// Drops every account subscription's sender, as a lost connection would.
    pub fn close_account_subscriptions(&self) {
        self.account_subscriptions.lock().clear();
    }

    pub fn active_account_subscriptions(&self) -> usize {
        self.account_subscriptions.lock().len()
    }

    pub fn unsubscribed(&self) -> Vec<u64> {
        self.unsubscribed.lock().clone()
    }

    pub fn push_log(&self, notification: LogNotification) {
        self.log_subscribers
            .lock()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Drops every log subscriber, as a lost connection would.
    pub fn drop_log_subscribers(&self) {
        self.log_subscribers.lock().clear();
    }

    pub fn log_subscriber_count(&self) -> usize {
        self.log_subscribers.lock().len()
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_lamports(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.lamports.lock().get(address).copied().unwrap_or(0))
    }

    async fn get_token_balance(&self, token_account: &Pubkey) -> Result<TokenBalance> {
        self.token_balances
            .lock()
            .get(token_account)
            .copied()
            .ok_or_else(|| anyhow!("could not find account {}", token_account))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(Hash::new_unique())
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        self.sent.lock().push(transaction.clone());
        Ok(transaction.signatures[0])
    }

    async fn confirm_transaction(&self, signature: &Signature) -> Result<()> {
        if self.fail_confirm.load(Ordering::SeqCst) {
            bail!("Transaction {} failed: custom program error: 0x1e", signature);
        }
        Ok(())
    }

    async fn get_recent_prioritization_fees(&self, _accounts: &[Pubkey]) -> Result<Vec<FeeSample>> {
        if self.fail_fees.load(Ordering::SeqCst) {
            bail!("getRecentPrioritizationFees unavailable");
        }
        Ok(self.fees.lock().clone())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<FetchedTransaction>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.lock().get(signature).cloned())
    }

    async fn subscribe_account(&self, address: &Pubkey) -> Result<AccountSubscription> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, updates) = mpsc::unbounded_channel();
        self.account_subscriptions.lock().insert(id, (*address, tx));
        Ok(AccountSubscription { id, updates })
    }

    async fn unsubscribe_account(&self, id: u64) -> Result<()> {
        self.account_subscriptions.lock().remove(&id);
        self.unsubscribed.lock().push(id);
        Ok(())
    }

    async fn subscribe_logs(&self, _program: &Pubkey) -> Result<LogSubscription> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, notifications) = mpsc::unbounded_channel();
        self.log_subscribers.lock().push(tx);
        Ok(LogSubscription { id, notifications })
    }
}
