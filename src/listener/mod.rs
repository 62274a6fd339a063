use crate::{
    cache::SeenCache,
    dex::raydium::amm::{CreatePoolParams, PoolDescriptor, PriceScale, build_pool_descriptor},
    error::SniperError,
    onchain::{ChainRpc, FetchedTransaction, LogNotification},
    store::{PoolRecord, PoolStore, persist_detached},
};
use anchor_client::solana_sdk::pubkey::Pubkey;
use anyhow::{Result, anyhow};
use rand::Rng;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const SEEN_TTL: Duration = Duration::from_secs(600);
const SEEN_PURGE_THRESHOLD: usize = 10_000;
const MAX_RETRIES: u32 = 20;
const MAX_BACKOFF_SECS: u64 = 120;

#[derive(Debug, Default)]
pub struct ListenerStats {
    pub notifications: AtomicU64,
    pub fetched: AtomicU64,
    pub detected: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

/// Watches the AMM program's logs and turns pool-creation transactions into
/// [`PoolDescriptor`]s.
pub struct LpListener {
    chain: Arc<dyn ChainRpc>,
    store: Arc<dyn PoolStore>,
    amm_program: Pubkey,
    aggregator_program: Pubkey,
    markers: Vec<String>,
    scale: PriceScale,
    seen: SeenCache<String>,
    stats: ListenerStats,
}

impl LpListener {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        store: Arc<dyn PoolStore>,
        amm_program: Pubkey,
        aggregator_program: Pubkey,
        markers: Vec<String>,
        scale: PriceScale,
    ) -> Self {
        Self {
            chain,
            store,
            amm_program,
            aggregator_program,
            markers,
            scale,
            seen: SeenCache::new(SEEN_TTL),
            stats: ListenerStats::default(),
        }
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    pub fn matches_pool_creation(&self, logs: &[String]) -> bool {
        logs.iter()
            .any(|line| self.markers.iter().any(|marker| line.contains(marker.as_str())))
    }

    /// Fetches `signature` and, if it creates a wrapped-SOL pool on the AMM,
    /// persists and returns its descriptor.
    pub async fn process_signature(&self, signature: &str) -> Result<Option<PoolDescriptor>> {
        let Some(tx) = self.chain.get_transaction(signature).await? else {
            debug!("Transaction {} not available yet", signature);
            return Ok(None);
        };
        self.stats.fetched.fetch_add(1, Ordering::Relaxed);

        let pool = match self.extract_pool(&tx)? {
            Some(pool) => pool,
            None => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        let v = pool.initial_price(&self.scale);
        info!(
            "🆕 New pool {} token {} (pc {}, coin {}, V {}) in {}",
            pool.amm_id, pool.token_mint, pool.init_pc_amount, pool.init_coin_amount, v, signature
        );
        persist_detached(self.store.clone(), PoolRecord::new(&pool, signature, v));
        self.stats.detected.fetch_add(1, Ordering::Relaxed);

        Ok(Some(pool))
    }

    fn extract_pool(&self, tx: &FetchedTransaction) -> Result<Option<PoolDescriptor>, SniperError> {
        if tx.account_keys.contains(&self.aggregator_program) {
            debug!("⏭️ {} goes through the aggregator, skipping", tx.signature);
            return Ok(None);
        }

        let Some(ix) = tx
            .instructions
            .iter()
            .find(|ix| tx.program_of(ix) == Some(self.amm_program) && !ix.data.is_empty())
        else {
            debug!("{} has no AMM instruction", tx.signature);
            return Ok(None);
        };

        let params = CreatePoolParams::decode(&ix.data)?;
        let pool = build_pool_descriptor(self.amm_program, &params, &tx.account_keys, &ix.accounts)?;

        if !pool.is_native_paired() {
            info!(
                "⏭️ Pool {} ({} / {}) is not paired with wrapped SOL, skipping",
                pool.amm_id, pool.token_mint, pool.quote_mint
            );
            return Ok(None);
        }
        Ok(Some(pool))
    }

    /// Filters one log batch and processes it. Never fails; problems are logged.
    pub async fn handle_notification(&self, notification: LogNotification) -> Option<PoolDescriptor> {
        self.stats.notifications.fetch_add(1, Ordering::Relaxed);
        if notification.failed || !self.matches_pool_creation(&notification.logs) {
            return None;
        }
        if !self.seen.first_sighting(notification.signature.clone()) {
            debug!("Already handled {}", notification.signature);
            return None;
        }
        if self.seen.len() > SEEN_PURGE_THRESHOLD {
            self.seen.purge_expired();
        }

        match self.process_signature(&notification.signature).await {
            Ok(pool) => pool,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                match e.downcast_ref::<SniperError>() {
                    Some(err) if err.is_benign() => {
                        debug!("Skipping {}: {}", notification.signature, err)
                    }
                    _ => warn!("⚠️ Skipping {}: {}", notification.signature, e),
                }
                None
            }
        }
    }

    /// One subscription session. Returns when the log stream closes.
    pub async fn run(self: Arc<Self>, pools: mpsc::UnboundedSender<PoolDescriptor>) -> Result<SessionEnd> {
        let mut subscription = self.chain.subscribe_logs(&self.amm_program).await?;
        info!(
            "📡 Subscribed to logs for program: {} (ID: {})",
            self.amm_program, subscription.id
        );

        let mut received = 0u64;
        while let Some(notification) = subscription.notifications.recv().await {
            received += 1;
            let listener = self.clone();
            let pools = pools.clone();
            tokio::spawn(async move {
                if let Some(pool) = listener.handle_notification(notification).await {
                    if pools.send(pool).is_err() {
                        debug!("Pool receiver dropped");
                    }
                }
            });
        }

        if pools.is_closed() {
            return Ok(SessionEnd::ReceiverClosed);
        }
        Ok(SessionEnd::StreamClosed { received })
    }

    pub async fn run_with_retry(self: Arc<Self>, pools: mpsc::UnboundedSender<PoolDescriptor>) -> Result<()> {
        let mut budget = RetryBudget::default();

        loop {
            let (healthy, cause) = match self.clone().run(pools.clone()).await {
                Ok(SessionEnd::ReceiverClosed) => {
                    info!("✅ Listener stopped, pool receiver is gone");
                    return Ok(());
                }
                Ok(SessionEnd::StreamClosed { received }) => (
                    received > 0,
                    anyhow!("Log stream ended after {} notifications", received),
                ),
                Err(e) => (false, e),
            };
            if pools.is_closed() {
                return Ok(());
            }

            let Some(attempt) = budget.record_drop(healthy) else {
                error!("🚫 Max retries ({}) exceeded, giving up: {}", MAX_RETRIES, cause);
                return Err(cause);
            };
            error!("❌ Listener error (attempt {}): {}", attempt, cause);

            let delay = backoff_delay(attempt);
            warn!(
                "🔄 Reconnecting in {:?}... (attempt {}/{})",
                delay, attempt, MAX_RETRIES
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// How a [`LpListener::run`] session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ReceiverClosed,
    /// The log stream closed after delivering `received` notifications.
    StreamClosed { received: u64 },
}

/// Counts consecutive failed sessions. A session that delivered
/// notifications starts the count over.
#[derive(Debug, Default)]
pub struct RetryBudget {
    attempts: u32,
}

impl RetryBudget {
    /// Returns the attempt number to retry with, or `None` once the budget is spent.
    pub fn record_drop(&mut self, healthy: bool) -> Option<u32> {
        if healthy {
            self.attempts = 0;
        }
        self.attempts += 1;
        (self.attempts < MAX_RETRIES).then_some(self.attempts)
    }
}

/// Exponential backoff capped at two minutes, with up to 500ms of jitter.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
    let jitter = rand::thread_rng().gen_range(0..500);
    Duration::from_secs(secs) + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::{JUPITER_AGGREGATOR, wsol_mint},
        dex::raydium::amm::{AccountRole, pool::tests::{sample_accounts, sample_params}},
        onchain::{mock::MockChain, transaction::parse_transaction_response},
        store::memory::MemoryPoolStore,
    };
    use anchor_client::solana_sdk::instruction::CompiledInstruction;
    use serde_json::json;
    use std::str::FromStr;

    const CREATE_LOG: &str = "Program log: initialize2: InitializeInstruction2 { nonce: 254, open_time: 0, init_pc_amount: 1000000, init_coin_amount: 500000 }";

    struct Harness {
        chain: Arc<MockChain>,
        store: Arc<MemoryPoolStore>,
        listener: Arc<LpListener>,
        amm: Pubkey,
        aggregator: Pubkey,
    }

    fn harness() -> Harness {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryPoolStore::default());
        let amm = Pubkey::new_unique();
        let aggregator = Pubkey::from_str(JUPITER_AGGREGATOR).unwrap();
        let listener = Arc::new(LpListener::new(
            chain.clone(),
            store.clone(),
            amm,
            aggregator,
            vec!["InitializeInstruction2".into(), "CreatePool".into()],
            PriceScale::UNIT,
        ));
        Harness {
            chain,
            store,
            listener,
            amm,
            aggregator,
        }
    }

    /// Static keys with the AMM program appended, and one create-pool instruction.
    fn create_pool_tx(signature: &str, amm: Pubkey, keys: Vec<Pubkey>, indices: Vec<u8>) -> FetchedTransaction {
        let mut account_keys = keys;
        account_keys.push(amm);
        let program_id_index = (account_keys.len() - 1) as u8;
        FetchedTransaction {
            signature: signature.to_string(),
            account_keys,
            instructions: vec![
                CompiledInstruction {
                    program_id_index: 0,
                    accounts: vec![],
                    data: vec![2, 0, 0, 0],
                },
                CompiledInstruction {
                    program_id_index,
                    accounts: indices,
                    data: sample_params().encode().to_vec(),
                },
            ],
        }
    }

    fn notification(signature: &str) -> LogNotification {
        LogNotification {
            signature: signature.to_string(),
            logs: vec!["Program 675k invoke [1]".into(), CREATE_LOG.into()],
            failed: false,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn marker_match_is_a_substring_search() {
        let h = harness();
        assert!(h.listener.matches_pool_creation(&[CREATE_LOG.to_string()]));
        assert!(h.listener.matches_pool_creation(&["Program log: Instruction: CreatePool".to_string()]));
        assert!(!h.listener.matches_pool_creation(&["Program log: Instruction: SwapBaseIn".to_string()]));
        assert!(!h.listener.matches_pool_creation(&[]));
    }

    #[tokio::test]
    async fn detects_and_persists_a_new_pool() {
        let h = harness();
        let (keys, indices) = sample_accounts();
        h.chain.add_transaction(create_pool_tx("sig-1", h.amm, keys.clone(), indices));

        let pool = h.listener.process_signature("sig-1").await.unwrap().unwrap();
        assert_eq!(pool.program_id, h.amm);
        assert_eq!(pool.amm_id, keys[AccountRole::AmmId.offset()]);
        assert_eq!(pool.quote_mint, wsol_mint());
        assert_eq!(pool.init_pc_amount, 1_000_000);

        settle().await;
        let records = h.store.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].signature, "sig-1");
        assert_eq!(records[0].v, 0.5);
        assert_eq!(h.listener.stats().detected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn aggregator_transactions_are_not_decoded() {
        let h = harness();
        let (mut keys, indices) = sample_accounts();
        keys[2] = h.aggregator;
        let mut tx = create_pool_tx("sig-agg", h.amm, keys, indices);
        // garbage payload: decoding it would fail loudly
        tx.instructions[1].data = vec![1, 2, 3];
        h.chain.add_transaction(tx);

        assert!(h.listener.process_signature("sig-agg").await.unwrap().is_none());
        settle().await;
        assert!(h.store.records.lock().is_empty());
        assert_eq!(h.listener.stats().skipped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn non_native_pools_are_skipped() {
        let h = harness();
        let (mut keys, indices) = sample_accounts();
        keys[AccountRole::QuoteMint.offset()] = Pubkey::new_unique();
        h.chain.add_transaction(create_pool_tx("sig-usdc", h.amm, keys, indices));

        assert!(h.listener.process_signature("sig-usdc").await.unwrap().is_none());
        settle().await;
        assert!(h.store.records.lock().is_empty());
    }

    #[tokio::test]
    async fn unresolved_account_is_benign_and_swallowed() {
        let h = harness();
        let (keys, mut indices) = sample_accounts();
        indices[AccountRole::MarketAsks.offset()] = 90;
        h.chain.add_transaction(create_pool_tx("sig-alt", h.amm, keys, indices));

        let err = h.listener.process_signature("sig-alt").await.unwrap_err();
        assert!(err.downcast_ref::<SniperError>().unwrap().is_benign());

        assert!(h.listener.handle_notification(notification("sig-alt")).await.is_none());
        assert_eq!(h.listener.stats().failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_reported_not_fatal() {
        let h = harness();
        let (keys, indices) = sample_accounts();
        let mut tx = create_pool_tx("sig-short", h.amm, keys, indices);
        tx.instructions[1].data = vec![1; 10];
        h.chain.add_transaction(tx);

        let err = h.listener.process_signature("sig-short").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SniperError>(),
            Some(SniperError::MalformedInstruction(_))
        ));
        assert!(h.listener.handle_notification(notification("sig-short")).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_and_unrelated_notifications_are_not_fetched() {
        let h = harness();
        let (keys, indices) = sample_accounts();
        h.chain.add_transaction(create_pool_tx("sig-1", h.amm, keys, indices));

        assert!(h.listener.handle_notification(notification("sig-1")).await.is_some());
        assert!(h.listener.handle_notification(notification("sig-1")).await.is_none());

        let unrelated = LogNotification {
            signature: "sig-swap".into(),
            logs: vec!["Program log: ray_log: AwDh9QUAAAAA".into()],
            failed: false,
        };
        assert!(h.listener.handle_notification(unrelated).await.is_none());

        let mut failed = notification("sig-failed");
        failed.failed = true;
        assert!(h.listener.handle_notification(failed).await.is_none());

        assert_eq!(h.chain.fetch_count(), 1);
    }

    #[tokio::test]
    async fn run_forwards_pools_until_the_stream_closes() {
        let h = harness();
        let (keys, indices) = sample_accounts();
        h.chain.add_transaction(create_pool_tx("sig-1", h.amm, keys, indices));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = tokio::spawn(h.listener.clone().run(tx));
        while h.chain.log_subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        h.chain.push_log(notification("sig-1"));
        let pool = rx.recv().await.unwrap();
        assert_eq!(pool.quote_mint, wsol_mint());

        h.chain.drop_log_subscribers();
        assert_eq!(
            session.await.unwrap().unwrap(),
            SessionEnd::StreamClosed { received: 1 }
        );
    }

    #[tokio::test]
    async fn empty_session_reports_nothing_received() {
        let h = harness();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = tokio::spawn(h.listener.clone().run(tx));
        while h.chain.log_subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        h.chain.drop_log_subscribers();
        assert_eq!(
            session.await.unwrap().unwrap(),
            SessionEnd::StreamClosed { received: 0 }
        );
    }

    #[test]
    fn healthy_sessions_never_spend_the_retry_budget() {
        let mut budget = RetryBudget::default();
        for _ in 0..(MAX_RETRIES * 3) {
            assert_eq!(budget.record_drop(true), Some(1));
        }
        // a few failed reconnects in between still start over after the next good session
        assert_eq!(budget.record_drop(false), Some(2));
        assert_eq!(budget.record_drop(false), Some(3));
        assert_eq!(budget.record_drop(true), Some(1));
    }

    #[test]
    fn consecutive_failures_exhaust_the_budget() {
        let mut budget = RetryBudget::default();
        for attempt in 1..MAX_RETRIES {
            assert_eq!(budget.record_drop(false), Some(attempt));
        }
        assert_eq!(budget.record_drop(false), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff_delay(1) >= Duration::from_secs(2));
        assert!(backoff_delay(3) >= Duration::from_secs(8));
        assert!(backoff_delay(30) < Duration::from_secs(MAX_BACKOFF_SECS + 1));
    }

    /// A create-pool transaction as returned by `getTransaction` with `json`
    /// encoding: compute budget first, then the AMM instruction addressing the
    /// static keys through a non-trivial index list.
    #[tokio::test]
    async fn recorded_transaction_shape_maps_every_role() {
        let h = harness();
        let (keys, _) = sample_accounts();
        // keys are laid out in reverse so the index list is not the identity
        let mut account_keys: Vec<String> = keys.iter().rev().map(|k| k.to_string()).collect();
        account_keys.push(h.amm.to_string());
        account_keys.push("ComputeBudget111111111111111111111111111111".to_string());
        let indices: Vec<u8> = (0..24u8).map(|i| 23 - i).collect();
        let data = bs58::encode(sample_params().encode()).into_string();

        let response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "slot": 245_000_000u64,
                "blockTime": 1_700_000_000i64,
                "meta": { "err": null, "fee": 5000 },
                "transaction": {
                    "signatures": ["sig-fixture"],
                    "message": {
                        "accountKeys": account_keys,
                        "instructions": [
                            { "programIdIndex": 25, "accounts": [], "data": "3DdGGhkhJbjm" },
                            { "programIdIndex": 24, "accounts": indices, "data": data }
                        ]
                    }
                }
            }
        });
        let tx = parse_transaction_response("sig-fixture", &response).unwrap().unwrap();
        h.chain.add_transaction(tx);

        let pool = h.listener.process_signature("sig-fixture").await.unwrap().unwrap();
        for role in AccountRole::ALL {
            let expected = keys[role.offset()];
            let actual = match role {
                AccountRole::AmmId => pool.amm_id,
                AccountRole::AmmAuthority => pool.amm_authority,
                AccountRole::AmmOpenOrders => pool.amm_open_orders,
                AccountRole::LpMint => pool.lp_mint,
                AccountRole::TokenMint => pool.token_mint,
                AccountRole::QuoteMint => pool.quote_mint,
                AccountRole::TokenVault => pool.token_vault,
                AccountRole::QuoteVault => pool.quote_vault,
                AccountRole::TargetOrders => pool.target_orders,
                AccountRole::MarketProgram => pool.market.program_id,
                AccountRole::MarketId => pool.market.id,
                AccountRole::Deployer => pool.deployer,
                AccountRole::MarketBaseVault => pool.market.base_vault,
                AccountRole::MarketQuoteVault => pool.market.quote_vault,
                AccountRole::MarketAuthority => pool.market.authority,
                AccountRole::MarketEventQueue => pool.market.event_queue,
                AccountRole::MarketBids => pool.market.bids,
                AccountRole::MarketAsks => pool.market.asks,
            };
            assert_eq!(actual, expected, "{:?}", role);
        }
        assert_eq!(pool.k.to_string(), "500000000000");
    }
}
