// =============================================================================
// Hard-Stop Monitor — event-driven stop with a REST safety net
// =============================================================================
//
// Real-time path: equity trades for the union of open symbols arrive from
// the stream task; each tick runs the per-account stop check
// (`note_price`). A crossing tick that wins the debounce dispatches a
// `close_position(symbol, "hard_stop")` task.
//
// Safety net: every 30 s each account's broker positions are polled over
// REST and fed through the same check, covering symbols the stream missed
// (reconnect gaps, subscription lag). Double dispatch is harmless — the
// close reentrancy guard collapses it to a single sell.
//
// The monitor also maintains the stream's watch set so subscriptions track
// the open books.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::broker::stream::EquityTrade;
use crate::config::HARD_STOP_POLL_SECS;
use crate::positions::PositionManager;
use crate::types::exit_reason;

/// How often the stream watch set is refreshed from the open books.
const WATCH_REFRESH_SECS: u64 = 5;

/// Union of open symbols across every account.
pub fn union_open_symbols(managers: &[Arc<PositionManager>]) -> HashSet<String> {
    let mut union = HashSet::new();
    for manager in managers {
        union.extend(manager.open_symbols());
    }
    union
}

/// Run until shutdown. `watch_set` is shared with the equity stream task.
pub async fn run_hard_stop_monitor(
    managers: Vec<Arc<PositionManager>>,
    watch_set: Arc<RwLock<HashSet<String>>>,
    mut trades: mpsc::Receiver<EquityTrade>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        accounts = managers.len(),
        poll_secs = HARD_STOP_POLL_SECS,
        "hard-stop monitor started"
    );

    let mut poll = tokio::time::interval(std::time::Duration::from_secs(HARD_STOP_POLL_SECS));
    let mut refresh =
        tokio::time::interval(std::time::Duration::from_secs(WATCH_REFRESH_SECS));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("hard-stop monitor stopping");
                return;
            }
            trade = trades.recv() => {
                let Some(trade) = trade else { return };
                for manager in &managers {
                    if manager.note_price(&trade.symbol, trade.price) {
                        dispatch_close(manager, &trade.symbol, trade.price);
                    }
                }
            }
            _ = poll.tick() => {
                for manager in &managers {
                    for symbol in manager.poll_marks().await {
                        let mark = manager
                            .position(&symbol)
                            .map(|p| p.last_price)
                            .unwrap_or(0.0);
                        dispatch_close(manager, &symbol, mark);
                    }
                }
            }
            _ = refresh.tick() => {
                let union = union_open_symbols(&managers);
                let mut current = watch_set.write();
                if *current != union {
                    debug!(symbols = union.len(), "hard-stop watch set updated");
                    *current = union;
                }
            }
        }
    }
}

fn dispatch_close(manager: &Arc<PositionManager>, symbol: &str, mark: f64) {
    info!(
        account = %manager.account(),
        symbol,
        mark,
        "hard stop crossed, dispatching close"
    );
    let manager = Arc::clone(manager);
    let symbol = symbol.to_string();
    tokio::spawn(async move {
        manager.close_position(&symbol, exit_reason::HARD_STOP).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::db::memory::MemoryTradeStore;
    use crate::positions::AccountLimits;
    use crate::types::AccountId;

    fn empty_manager(account: AccountId) -> Arc<PositionManager> {
        Arc::new(PositionManager::new(
            account,
            Arc::new(MockBroker::new()),
            Arc::new(MemoryTradeStore::new()),
            AccountLimits::default(),
        ))
    }

    #[test]
    fn union_of_empty_books_is_empty() {
        let managers = vec![empty_manager(AccountId::A), empty_manager(AccountId::B)];
        assert!(union_open_symbols(&managers).is_empty());
    }

    #[tokio::test]
    async fn union_merges_both_accounts() {
        use crate::aggregator::WindowStats;
        use crate::scorer::ScoreBreakdown;
        use crate::signals::Signal;
        use crate::ta::TaSnapshot;

        let signal = |symbol: &str| Signal {
            symbol: symbol.to_string(),
            detected_at: chrono::Utc::now(),
            stats: WindowStats::default(),
            volume_ratio: 8.0,
            baseline_notional: 50_000.0,
            score: ScoreBreakdown::default(),
            ta: TaSnapshot::default(),
            trend: None,
            spot_price: 100.0,
            metadata: serde_json::Value::Null,
        };

        let broker_a = Arc::new(MockBroker::new());
        broker_a.set_snapshot("AAPL", 100.0);
        let mgr_a = Arc::new(PositionManager::new(
            AccountId::A,
            broker_a,
            Arc::new(MemoryTradeStore::new()),
            AccountLimits::default(),
        ));
        mgr_a.open_position(&signal("AAPL"), None, true).await;

        let broker_b = Arc::new(MockBroker::new());
        broker_b.set_snapshot("NET", 100.0);
        let mgr_b = Arc::new(PositionManager::new(
            AccountId::B,
            broker_b,
            Arc::new(MemoryTradeStore::new()),
            AccountLimits::default(),
        ));
        mgr_b.open_position(&signal("NET"), None, true).await;

        let union = union_open_symbols(&[mgr_a, mgr_b]);
        assert_eq!(union.len(), 2);
        assert!(union.contains("AAPL"));
        assert!(union.contains("NET"));
    }
}
