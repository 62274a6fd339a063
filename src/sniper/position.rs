use super::executor::TradeAccounts;
use crate::{
    dex::raydium::amm::{PoolDescriptor, PriceScale, constant_product_price},
    onchain::ChainRpc,
};
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionHandle(pub u64);

impl fmt::Display for PositionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PositionState {
    Buying = 0,
    Watching = 1,
    Selling = 2,
    Sold = 3,
    Failed = 4,
}

impl PositionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PositionState::Buying,
            1 => PositionState::Watching,
            2 => PositionState::Selling,
            3 => PositionState::Sold,
            _ => PositionState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PositionState::Sold | PositionState::Failed)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PositionState::Buying => "BUYING",
            PositionState::Watching => "WATCHING",
            PositionState::Selling => "SELLING",
            PositionState::Sold => "SOLD",
            PositionState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

pub fn target_price(initial_price: f64, percentage: f64) -> f64 {
    initial_price * (1.0 + percentage / 100.0)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionParams {
    pub buy_amount: u64,
    pub sell_target_percentage: f64,
    pub target_price: f64,
}

/// Releases the vault subscription it wraps. Dropping it without calling
/// [`SubscriptionGuard::release`] still unsubscribes, in the background.
pub struct SubscriptionGuard {
    chain: Arc<dyn ChainRpc>,
    id: Option<u64>,
}

impl SubscriptionGuard {
    pub fn new(chain: Arc<dyn ChainRpc>, id: u64) -> Self {
        Self { chain, id: Some(id) }
    }

    /// Gives up the id without unsubscribing, for a subscription whose
    /// connection is already gone.
    pub fn forget(mut self) -> Option<u64> {
        self.id.take()
    }

    pub async fn release(mut self) {
        if let Some(id) = self.id.take() {
            unsubscribe(self.chain.clone(), id).await;
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(unsubscribe(self.chain.clone(), id));
            }
            Err(_) => warn!("⚠️ Subscription {} leaked, no runtime to release it", id),
        }
    }
}

async fn unsubscribe(chain: Arc<dyn ChainRpc>, id: u64) {
    match chain.unsubscribe_account(id).await {
        Ok(()) => debug!("🔕 Released vault subscription {}", id),
        Err(e) => warn!("⚠️ Failed to release vault subscription {}: {}", id, e),
    }
}

/// One monitored pool: the descriptor, the trade parameters and the
/// lifecycle state shared by both observation paths.
pub struct Position {
    pub handle: PositionHandle,
    pub pool: Arc<PoolDescriptor>,
    pub accounts: TradeAccounts,
    scale: PriceScale,
    /// V after scaling. Fixed for the life of the position.
    initial_price: f64,
    k: f64,
    state: AtomicU8,
    params: RwLock<PositionParams>,
    subscription: Mutex<Option<SubscriptionGuard>>,
}

impl Position {
    pub fn new(
        handle: PositionHandle,
        pool: Arc<PoolDescriptor>,
        accounts: TradeAccounts,
        buy_amount: u64,
        sell_target_percentage: f64,
        scale: PriceScale,
    ) -> Self {
        let initial_price = pool.initial_price(&scale);
        let k = scale.invariant(&pool.k);
        Self {
            handle,
            pool,
            accounts,
            scale,
            initial_price,
            k,
            state: AtomicU8::new(PositionState::Buying as u8),
            params: RwLock::new(PositionParams {
                buy_amount,
                sell_target_percentage,
                target_price: target_price(initial_price, sell_target_percentage),
            }),
            subscription: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PositionState {
        PositionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `from -> to` only if the state still is `from`.
    pub fn transition(&self, from: PositionState, to: PositionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The single gate into the sell path.
    pub fn try_begin_sell(&self) -> bool {
        self.transition(PositionState::Watching, PositionState::Selling)
    }

    pub(crate) fn set_state(&self, state: PositionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn initial_price(&self) -> f64 {
        self.initial_price
    }

    pub fn params(&self) -> PositionParams {
        *self.params.read()
    }

    pub fn buy_amount(&self) -> u64 {
        self.params.read().buy_amount
    }

    pub fn target_price(&self) -> f64 {
        self.params.read().target_price
    }

    pub fn set_buy_amount(&self, amount: u64) {
        self.params.write().buy_amount = amount;
    }

    /// Returns the new target, always derived from the fixed initial price.
    pub fn set_sell_target(&self, percentage: f64) -> f64 {
        let mut params = self.params.write();
        params.sell_target_percentage = percentage;
        params.target_price = target_price(self.initial_price, percentage);
        params.target_price
    }

    /// Price implied by a quote-vault balance of `lamports`.
    pub fn price_for(&self, lamports: u64) -> f64 {
        constant_product_price(self.scale.reserve(lamports), self.k)
    }

    pub fn attach_subscription(&self, guard: SubscriptionGuard) {
        *self.subscription.lock() = Some(guard);
    }

    pub fn take_subscription(&self) -> Option<SubscriptionGuard> {
        self.subscription.lock().take()
    }
}
