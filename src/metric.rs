use crate::{listener::LpListener, sniper::SniperManager};
use std::sync::{Arc, atomic::Ordering};
use tokio::time;
use tracing::info;

pub fn start(delay_seconds: u64, manager: SniperManager, listener: Arc<LpListener>) {
    let period = time::Duration::from_secs(delay_seconds.max(1));
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    tokio::spawn(async move {
        info!("Log starting...");
        loop {
            interval.tick().await;
            info!("{}", summary(&manager, &listener));
        }
    });
}

pub fn summary(manager: &SniperManager, listener: &LpListener) -> String {
    let fleet = manager.stats();
    let seen = listener.stats();
    format!(
        "{} notifications, {} fetched, {} pools detected, {} skipped, {} failed | {} positions ({} watching, {} selling), {} bought, {} sold, {} failed",
        seen.notifications.load(Ordering::Relaxed),
        seen.fetched.load(Ordering::Relaxed),
        seen.detected.load(Ordering::Relaxed),
        seen.skipped.load(Ordering::Relaxed),
        seen.failed.load(Ordering::Relaxed),
        fleet.active,
        fleet.watching,
        fleet.selling,
        fleet.bought,
        fleet.sold,
        fleet.failed
    )
}
