use super::{
    executor::{TradeAccounts, TradeExecutor},
    position::{Position, PositionHandle, PositionState, SubscriptionGuard},
};
use crate::{
    dex::raydium::amm::{PoolDescriptor, PriceScale},
    error::SniperError,
};
use anchor_client::solana_sdk::{pubkey::Pubkey, signature::Signature};
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc},
    time::{Instant, interval_at},
};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// What a new position is opened with.
#[derive(Clone, Debug)]
pub struct PositionConfig {
    pub pool: Arc<PoolDescriptor>,
    pub accounts: TradeAccounts,
    pub buy_amount: u64,
    pub sell_target_percentage: f64,
}

/// Published on every lifecycle transition.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionEvent {
    pub handle: PositionHandle,
    pub pool: Pubkey,
    pub from: PositionState,
    pub to: PositionState,
    /// Why the position failed, on transitions into FAILED.
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub active: usize,
    pub watching: usize,
    pub selling: usize,
    pub bought: u64,
    pub sold: u64,
    pub failed: u64,
}

struct FleetInner {
    executor: Arc<TradeExecutor>,
    positions: RwLock<BTreeMap<PositionHandle, Arc<Position>>>,
    next_handle: AtomicU64,
    events: broadcast::Sender<PositionEvent>,
    poll_interval: Duration,
    scale: PriceScale,
    bought: AtomicU64,
    sold: AtomicU64,
    failed: AtomicU64,
}

/// Owns every live position. Cheap to clone; clones share the same fleet.
#[derive(Clone)]
pub struct SniperManager {
    inner: Arc<FleetInner>,
}

impl SniperManager {
    pub fn new(executor: Arc<TradeExecutor>, poll_interval: Duration, scale: PriceScale) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(FleetInner {
                executor,
                positions: RwLock::new(BTreeMap::new()),
                next_handle: AtomicU64::new(1),
                events,
                poll_interval,
                scale,
                bought: AtomicU64::new(0),
                sold: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PositionEvent> {
        self.inner.events.subscribe()
    }

    /// Buys into the pool and starts watching it. A failed buy leaves nothing behind.
    pub async fn add_position(&self, config: PositionConfig) -> Result<PositionHandle, SniperError> {
        let inner = &self.inner;
        let handle = PositionHandle(inner.next_handle.fetch_add(1, Ordering::Relaxed));
        let position = Arc::new(Position::new(
            handle,
            config.pool,
            config.accounts,
            config.buy_amount,
            config.sell_target_percentage,
            inner.scale,
        ));
        info!(
            "🎯 Position {} on pool {} token {}: V {}, target {} ({}%)",
            handle,
            position.pool.amm_id,
            position.pool.token_mint,
            position.initial_price(),
            position.target_price(),
            config.sell_target_percentage
        );

        let signature = match inner
            .executor
            .buy(&position.pool, &position.accounts, position.buy_amount())
            .await
        {
            Ok(signature) => signature,
            Err(e) => {
                error!("❌ Buy failed for {}: {}", handle, e);
                position.set_state(PositionState::Failed);
                inner.failed.fetch_add(1, Ordering::Relaxed);
                inner.emit(
                    &position,
                    PositionState::Buying,
                    PositionState::Failed,
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };
        inner.bought.fetch_add(1, Ordering::Relaxed);
        info!("✅ Bought into {} with {}", handle, signature);

        let updates = match inner
            .executor
            .chain()
            .subscribe_account(&position.pool.quote_vault)
            .await
        {
            Ok(subscription) => {
                position.attach_subscription(SubscriptionGuard::new(
                    inner.executor.chain(),
                    subscription.id,
                ));
                info!(
                    "👀 Subscribed to account changes for vault {} ({})",
                    position.pool.quote_vault, handle
                );
                Some(subscription.updates)
            }
            Err(e) => {
                warn!(
                    "⚠️ Vault subscription failed for {}, polling only: {}",
                    handle, e
                );
                None
            }
        };

        inner.positions.write().insert(handle, position.clone());
        position.transition(PositionState::Buying, PositionState::Watching);
        inner.emit(&position, PositionState::Buying, PositionState::Watching, None);

        FleetInner::spawn_poll(inner.clone(), position.clone());
        if let Some(updates) = updates {
            FleetInner::spawn_push(inner.clone(), position, updates);
        }

        Ok(handle)
    }

    pub fn set_buy_amount(&self, handle: PositionHandle, amount: u64) -> Result<(), SniperError> {
        let position = self.get(handle)?;
        position.set_buy_amount(amount);
        info!("Buy amount set to {} for {}", amount, handle);
        Ok(())
    }

    /// Returns the recomputed target price.
    pub fn set_sell_target(&self, handle: PositionHandle, percentage: f64) -> Result<f64, SniperError> {
        let position = self.get(handle)?;
        let target = position.set_sell_target(percentage);
        info!("Sell target set to {}% ({}) for {}", percentage, target, handle);
        Ok(target)
    }

    /// Feeds one vault balance reading to a position. Returns whether this
    /// reading triggered the sell.
    pub async fn observe(&self, handle: PositionHandle, lamports: u64) -> Result<bool, SniperError> {
        let position = self.get(handle)?;
        Ok(FleetInner::on_observation(&self.inner, &position, lamports, "manual").await)
    }

    pub fn get(&self, handle: PositionHandle) -> Result<Arc<Position>, SniperError> {
        self.inner
            .positions
            .read()
            .get(&handle)
            .cloned()
            .ok_or(SniperError::PositionNotFound(handle))
    }

    pub fn contains(&self, handle: PositionHandle) -> bool {
        self.inner.positions.read().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.inner.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handles(&self) -> Vec<PositionHandle> {
        self.inner.positions.read().keys().copied().collect()
    }

    pub fn stats(&self) -> FleetStats {
        let positions = self.inner.positions.read();
        let count = |state| positions.values().filter(|p| p.state() == state).count();
        FleetStats {
            active: positions.len(),
            watching: count(PositionState::Watching),
            selling: count(PositionState::Selling),
            bought: self.inner.bought.load(Ordering::Relaxed),
            sold: self.inner.sold.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

impl FleetInner {
    fn emit(&self, position: &Position, from: PositionState, to: PositionState, error: Option<String>) {
        debug!("{} {} -> {}", position.handle, from, to);
        // no receivers is fine
        let _ = self.events.send(PositionEvent {
            handle: position.handle,
            pool: position.pool.amm_id,
            from,
            to,
            error,
        });
    }

    fn spawn_poll(inner: Arc<FleetInner>, position: Arc<Position>) {
        tokio::spawn(async move {
            let period = inner.poll_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if position.state() != PositionState::Watching {
                    break;
                }
                match inner
                    .executor
                    .chain()
                    .get_lamports(&position.pool.quote_vault)
                    .await
                {
                    Ok(lamports) => {
                        FleetInner::on_observation(&inner, &position, lamports, "poll").await;
                    }
                    Err(e) => warn!(
                        "⚠️ Unable to fetch vault {} for {}: {}",
                        position.pool.quote_vault, position.handle, e
                    ),
                }
            }
            debug!("Poll stopped for {}", position.handle);
        });
    }

    fn spawn_push(
        inner: Arc<FleetInner>,
        position: Arc<Position>,
        mut updates: mpsc::UnboundedReceiver<u64>,
    ) {
        tokio::spawn(async move {
            loop {
                let update = updates.recv().await;
                if position.state() != PositionState::Watching {
                    break;
                }
                match update {
                    Some(lamports) => {
                        FleetInner::on_observation(&inner, &position, lamports, "push").await;
                    }
                    None => match FleetInner::resubscribe(&inner, &position).await {
                        Some(next) => updates = next,
                        None => break,
                    },
                }
            }
            debug!("Vault updates ended for {}", position.handle);
        });
    }

    /// Replaces a subscription whose connection went away. Keeps trying while
    /// the position is still watching.
    async fn resubscribe(
        inner: &FleetInner,
        position: &Position,
    ) -> Option<mpsc::UnboundedReceiver<u64>> {
        let stale = position.take_subscription().and_then(SubscriptionGuard::forget);
        warn!(
            "⚠️ Vault subscription {} for {} closed, resubscribing",
            stale.map_or_else(|| "-".to_string(), |id| id.to_string()),
            position.handle
        );

        let chain = inner.executor.chain();
        while position.state() == PositionState::Watching {
            match chain.subscribe_account(&position.pool.quote_vault).await {
                Ok(subscription) => {
                    position.attach_subscription(SubscriptionGuard::new(chain.clone(), subscription.id));
                    if position.state() != PositionState::Watching {
                        // the sell finished while we were reconnecting
                        if let Some(guard) = position.take_subscription() {
                            guard.release().await;
                        }
                        return None;
                    }
                    info!(
                        "👀 Resubscribed to vault {} for {} (ID: {})",
                        position.pool.quote_vault, position.handle, subscription.id
                    );
                    return Some(subscription.updates);
                }
                Err(e) => {
                    warn!(
                        "⚠️ Resubscribe failed for {}, retrying in {:?}: {}",
                        position.handle, RESUBSCRIBE_DELAY, e
                    );
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                }
            }
        }
        None
    }

    async fn on_observation(
        inner: &Arc<FleetInner>,
        position: &Arc<Position>,
        lamports: u64,
        source: &'static str,
    ) -> bool {
        let price = position.price_for(lamports);
        let target = position.target_price();
        debug!(
            "📈 {} price {} (target {}) from {} balance {}",
            position.handle, price, target, source, lamports
        );
        if price < target || !position.try_begin_sell() {
            return false;
        }

        info!(
            "🚀 {} target reached: {} >= {} ({})",
            position.handle, price, target, source
        );
        inner.emit(position, PositionState::Watching, PositionState::Selling, None);
        let result = inner
            .executor
            .sell(&position.pool, &position.accounts, position.buy_amount())
            .await;
        inner.finish(position, result).await;
        true
    }

    async fn finish(&self, position: &Position, result: Result<Signature, SniperError>) {
        if let Some(guard) = position.take_subscription() {
            guard.release().await;
        }

        let (to, cause) = match result {
            Ok(signature) => {
                info!("✅ {} sold: {}", position.handle, signature);
                self.sold.fetch_add(1, Ordering::Relaxed);
                (PositionState::Sold, None)
            }
            Err(e) => {
                error!("❌ Sell failed for {}: {}", position.handle, e);
                self.failed.fetch_add(1, Ordering::Relaxed);
                (PositionState::Failed, Some(e.to_string()))
            }
        };
        position.set_state(to);
        self.positions.write().remove(&position.handle);
        self.emit(position, PositionState::Selling, to, cause);
    }
}
