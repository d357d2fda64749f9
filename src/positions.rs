// =============================================================================
// Position Manager — per-account open/close lifecycle with hard guarantees
// =============================================================================
//
// One instance per paper account. Owns the account's position state
// exclusively:
//
//   active   symbol -> filled Position (backed by an open trade-log row)
//   pending  symbol -> order submitted, fill not yet confirmed
//   closing_in_progress / pending_close   reentrancy + debounce guards
//
// Invariants enforced here:
//   - at most one active-or-pending position per symbol
//   - open and close for the same symbol are mutually exclusive
//     (presence checks + the closing set)
//   - the closing guard is released on every path, including errors
//   - positions are never liquidated on unexpected shutdown; only the EOD
//     close and the hard stop sell
//
// Persistence failures never stop trading: in-memory state is authoritative
// for the session and the startup reconciler heals the store on next boot.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::broker::{Broker, OrderSide};
use crate::config::{HARD_STOP_PCT, POS_NOTIONAL_CAP, POS_PCT, SECTOR_CAP};
use crate::db::{TradeClose, TradeOpen, TradeStore};
use crate::filters::{MARKET_REGIME_WEAK, NO_PRICE, SECTOR_CONCENTRATION};
use crate::signals::Signal;
use crate::types::{exit_reason, AccountId};

// Rejection reasons produced at this stage (the chain's own reasons live in
// filters.rs).
pub const DUPLICATE_POSITION: &str = "duplicate_position";
pub const MAX_CONCURRENT: &str = "max_concurrent";
pub const SIZE_ZERO: &str = "size_zero";
pub const ORDER_FAILED: &str = "order_failed";

/// Per-account sizing and risk limits.
#[derive(Debug, Clone, Copy)]
pub struct AccountLimits {
    pub max_concurrent: usize,
    pub notional_cap: f64,
    pub position_pct: f64,
    pub hard_stop_pct: f64,
}

impl Default for AccountLimits {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            notional_cap: POS_NOTIONAL_CAP,
            position_pct: POS_PCT,
            hard_stop_pct: HARD_STOP_PCT,
        }
    }
}

/// One open equity position.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub symbol: String,
    pub db_id: i64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub shares: i64,
    pub sector: Option<String>,
    pub score_total: i32,
    pub rsi_14: Option<f64>,
    pub signal_notional: f64,
    pub detected_at: Option<DateTime<Utc>>,
    /// Latest mark seen by the hard-stop monitor.
    pub last_price: f64,
}

#[derive(Debug, Clone)]
struct PendingOrder {
    sector: Option<String>,
}

/// Result of an open attempt.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Opened(Position),
    Rejected(&'static str),
}

impl OpenOutcome {
    pub fn rejected_reason(&self) -> Option<&'static str> {
        match self {
            Self::Opened(_) => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}

/// Daily counters surfaced on the status API.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DailyStats {
    pub opened: u32,
    pub closed: u32,
    pub realized_pnl: f64,
}

/// Outcome of the three-way startup reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub restored: u32,
    pub crash_recovered: u32,
    pub orphans_closed: u32,
}

pub struct PositionManager {
    account: AccountId,
    broker: Arc<dyn Broker>,
    store: Arc<dyn TradeStore>,
    limits: AccountLimits,

    active: RwLock<HashMap<String, Position>>,
    pending: RwLock<HashMap<String, PendingOrder>>,
    /// Reentrancy guard for close_position.
    closing: Mutex<HashSet<String>>,
    /// Debounce for hard-stop dispatch (cleared when the close finishes).
    pending_close: Mutex<HashSet<String>>,

    closed_today: AtomicBool,
    daily: RwLock<DailyStats>,
    persistence_errors: AtomicU64,
}

impl PositionManager {
    pub fn new(
        account: AccountId,
        broker: Arc<dyn Broker>,
        store: Arc<dyn TradeStore>,
        limits: AccountLimits,
    ) -> Self {
        Self {
            account,
            broker,
            store,
            limits,
            active: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            closing: Mutex::new(HashSet::new()),
            pending_close: Mutex::new(HashSet::new()),
            closed_today: AtomicBool::new(false),
            daily: RwLock::new(DailyStats::default()),
            persistence_errors: AtomicU64::new(0),
        }
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Admit a passed signal: limit checks, sizing, market buy, trade-log
    /// insert. `sector` comes from reference data, `regime_ok` from the
    /// cached benchmark gate.
    pub async fn open_position(
        &self,
        signal: &Signal,
        sector: Option<String>,
        regime_ok: bool,
    ) -> OpenOutcome {
        let symbol = signal.symbol.as_str();

        if signal.spot_price <= 0.0 {
            return OpenOutcome::Rejected(NO_PRICE);
        }
        if !regime_ok {
            info!(account = %self.account, symbol, "entry gated by market regime");
            return OpenOutcome::Rejected(MARKET_REGIME_WEAK);
        }

        // Presence, capacity, and sector checks plus the pending insert all
        // happen under one write lock so concurrent opens cannot both pass.
        {
            let active = self.active.read();
            let mut pending = self.pending.write();

            if active.contains_key(symbol) || pending.contains_key(symbol) {
                return OpenOutcome::Rejected(DUPLICATE_POSITION);
            }
            if active.len() + pending.len() >= self.limits.max_concurrent {
                return OpenOutcome::Rejected(MAX_CONCURRENT);
            }
            if let Some(sector_name) = sector.as_deref() {
                let same_sector = active
                    .values()
                    .filter(|p| p.sector.as_deref() == Some(sector_name))
                    .count()
                    + pending
                        .values()
                        .filter(|p| p.sector.as_deref() == Some(sector_name))
                        .count();
                if same_sector >= SECTOR_CAP {
                    return OpenOutcome::Rejected(SECTOR_CONCENTRATION);
                }
            }

            pending.insert(
                symbol.to_string(),
                PendingOrder {
                    sector: sector.clone(),
                },
            );
        }

        let outcome = self.submit_entry(signal, sector).await;
        if let OpenOutcome::Rejected(reason) = &outcome {
            self.pending.write().remove(symbol);
            warn!(account = %self.account, symbol, reason, "entry rejected");
        }
        outcome
    }

    async fn submit_entry(&self, signal: &Signal, sector: Option<String>) -> OpenOutcome {
        let symbol = signal.symbol.as_str();

        let equity = match self.broker.account_equity().await {
            Ok(equity) => equity,
            Err(e) => {
                // Size off the cap alone rather than refusing the trade.
                warn!(account = %self.account, symbol, error = %e, "equity fetch failed, sizing from cap");
                self.limits.notional_cap / self.limits.position_pct
            }
        };

        let budget = self
            .limits
            .notional_cap
            .min(equity * self.limits.position_pct);
        let shares = (budget / signal.spot_price).floor() as i64;
        if shares <= 0 {
            return OpenOutcome::Rejected(SIZE_ZERO);
        }

        let fill = match self
            .broker
            .submit_market_order(symbol, OrderSide::Buy, shares as f64)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!(account = %self.account, symbol, error = %e, "market buy failed");
                return OpenOutcome::Rejected(ORDER_FAILED);
            }
        };

        let entry_time = Utc::now();
        let open_row = TradeOpen {
            symbol: symbol.to_string(),
            entry_time,
            entry_price: fill.avg_price,
            shares,
            score_total: signal.score_total() as i32,
            rsi_14: signal.ta.rsi_14,
            signal_notional: signal.stats.notional_total,
            volume_ratio: signal.volume_ratio,
            detected_at: signal.detected_at,
        };

        let db_id = match self.store.log_trade_open(self.account, &open_row).await {
            Ok(id) => id,
            Err(e) => {
                self.persistence_errors.fetch_add(1, Ordering::Relaxed);
                error!(account = %self.account, symbol, error = %e, "trade-open persist failed");
                -1
            }
        };

        let position = Position {
            symbol: symbol.to_string(),
            db_id,
            entry_time,
            entry_price: fill.avg_price,
            shares,
            sector,
            score_total: signal.score_total() as i32,
            rsi_14: signal.ta.rsi_14,
            signal_notional: signal.stats.notional_total,
            detected_at: Some(signal.detected_at),
            last_price: fill.avg_price,
        };

        {
            let mut active = self.active.write();
            let mut pending = self.pending.write();
            pending.remove(symbol);
            active.insert(symbol.to_string(), position.clone());
        }
        self.daily.write().opened += 1;

        info!(
            account = %self.account,
            symbol,
            shares,
            entry_price = fill.avg_price,
            score = position.score_total,
            db_id,
            "position opened"
        );
        OpenOutcome::Opened(position)
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close one position. Reentrancy-safe: concurrent calls for the same
    /// symbol collapse to a single sell, and a symbol that is not active is
    /// tolerated. Returns the realized PnL when this call did the close.
    pub async fn close_position(&self, symbol: &str, reason: &str) -> Option<f64> {
        if !self.closing.lock().insert(symbol.to_string()) {
            return None; // close already in flight
        }

        let result = self.close_inner(symbol, reason).await;

        // Guard release is unconditional.
        self.closing.lock().remove(symbol);
        self.pending_close.lock().remove(symbol);
        result
    }

    async fn close_inner(&self, symbol: &str, reason: &str) -> Option<f64> {
        let position = self.active.read().get(symbol).cloned()?;

        let fill = match self
            .broker
            .submit_market_order(symbol, OrderSide::Sell, position.shares as f64)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                // Keep the position; the monitor or EOD loop will retry.
                error!(account = %self.account, symbol, reason, error = %e, "market sell failed");
                return None;
            }
        };

        let exit_price = fill.avg_price;
        let pnl = (exit_price - position.entry_price) * position.shares as f64;
        let pnl_pct = if position.entry_price > 0.0 {
            exit_price / position.entry_price - 1.0
        } else {
            0.0
        };

        let close_row = TradeClose {
            exit_time: Utc::now(),
            exit_price,
            pnl,
            pnl_pct,
            exit_reason: reason.to_string(),
        };
        if let Err(e) = self
            .store
            .log_trade_close(self.account, position.db_id, &close_row)
            .await
        {
            self.persistence_errors.fetch_add(1, Ordering::Relaxed);
            error!(account = %self.account, symbol, error = %e, "trade-close persist failed");
        }

        if let Some(detected_at) = position.detected_at {
            if let Err(e) = self.store.mark_signal_closed(symbol, detected_at).await {
                self.persistence_errors.fetch_add(1, Ordering::Relaxed);
                warn!(account = %self.account, symbol, error = %e, "signal close-mark failed");
            }
        }

        self.active.write().remove(symbol);
        {
            let mut daily = self.daily.write();
            daily.closed += 1;
            daily.realized_pnl += pnl;
        }

        info!(
            account = %self.account,
            symbol,
            reason,
            exit_price,
            pnl = format!("{pnl:.2}"),
            pnl_pct = format!("{:.4}", pnl_pct),
            "position closed"
        );
        Some(pnl)
    }

    // -------------------------------------------------------------------------
    // Hard stop
    // -------------------------------------------------------------------------

    /// Feed one price tick. Returns `true` when the hard stop crossed and
    /// this tick won the dispatch debounce — the caller then issues the
    /// close. Rapid-fire ticks after the first return `false`.
    pub fn note_price(&self, symbol: &str, price: f64) -> bool {
        if price <= 0.0 {
            return false;
        }

        let crossed = {
            let mut active = self.active.write();
            let Some(position) = active.get_mut(symbol) else {
                return false;
            };
            position.last_price = price;
            if position.entry_price <= 0.0 {
                return false;
            }
            price / position.entry_price - 1.0 <= self.limits.hard_stop_pct
        };

        if !crossed {
            return false;
        }
        // insert() is the debounce: only the first crossing tick wins.
        self.pending_close.lock().insert(symbol.to_string())
    }

    /// REST safety net: pull broker marks and run the same hard-stop check
    /// as the stream path. Returns the symbols whose stop tripped on this
    /// poll (debounced exactly like stream ticks).
    pub async fn poll_marks(&self) -> Vec<String> {
        let positions = match self.broker.open_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(account = %self.account, error = %e, "hard-stop REST poll failed");
                return Vec::new();
            }
        };

        positions
            .iter()
            .filter_map(|p| {
                let price = p.current_price.filter(|px| *px > 0.0)?;
                self.note_price(&p.symbol, price).then(|| p.symbol.clone())
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // EOD
    // -------------------------------------------------------------------------

    /// Liquidate everything, in parallel, and latch the daily-closed flag.
    pub async fn close_all_eod(self: &Arc<Self>) {
        let symbols: Vec<String> = self.active.read().keys().cloned().collect();
        if !symbols.is_empty() {
            info!(account = %self.account, count = symbols.len(), "EOD liquidation");
            let closes = symbols.iter().map(|symbol| {
                let manager = Arc::clone(self);
                let symbol = symbol.clone();
                async move {
                    manager.close_position(&symbol, exit_reason::EOD).await;
                }
            });
            futures_util::future::join_all(closes).await;
        }
        self.closed_today.store(true, Ordering::Relaxed);
    }

    pub fn eod_done(&self) -> bool {
        self.closed_today.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Startup reconcile
    // -------------------------------------------------------------------------

    /// Three-way merge of trade-log rows, broker positions, and memory.
    /// Idempotent: a second run finds nothing left to heal.
    pub async fn sync_on_startup(&self) -> anyhow::Result<ReconcileSummary> {
        let db_rows = self.store.load_open_trades(self.account).await?;
        let broker_positions = self.broker.open_positions().await?;
        let by_symbol: HashMap<String, crate::broker::BrokerPosition> = broker_positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();

        let mut summary = ReconcileSummary::default();

        for row in &db_rows {
            if let Some(broker_pos) = by_symbol.get(&row.symbol) {
                // Case A: both sides agree — restore with full metadata.
                if self.active.read().contains_key(&row.symbol) {
                    continue;
                }
                let last_price = broker_pos
                    .current_price
                    .filter(|p| *p > 0.0)
                    .unwrap_or(row.entry_price);
                self.active.write().insert(
                    row.symbol.clone(),
                    Position {
                        symbol: row.symbol.clone(),
                        db_id: row.db_id,
                        entry_time: row.entry_time,
                        entry_price: row.entry_price,
                        shares: row.shares,
                        sector: None,
                        score_total: row.score_total,
                        rsi_14: row.rsi_14,
                        signal_notional: row.signal_notional,
                        detected_at: row.detected_at,
                        last_price,
                    },
                );
                summary.restored += 1;
                info!(account = %self.account, symbol = %row.symbol, db_id = row.db_id, "position restored");
            } else {
                // Case B: the log says open but the broker disagrees — the
                // position died with a previous process. Close the row at
                // the last known price (entry, absent anything better).
                let close_row = TradeClose {
                    exit_time: Utc::now(),
                    exit_price: row.entry_price,
                    pnl: 0.0,
                    pnl_pct: 0.0,
                    exit_reason: exit_reason::CRASH_RECOVERY.to_string(),
                };
                if let Err(e) = self
                    .store
                    .log_trade_close(self.account, row.db_id, &close_row)
                    .await
                {
                    error!(account = %self.account, symbol = %row.symbol, error = %e, "crash-recovery close failed");
                } else {
                    summary.crash_recovered += 1;
                    warn!(account = %self.account, symbol = %row.symbol, "crash recovery: trade-log row closed");
                }
            }
        }

        // Case C: broker positions with no open row are orphans — liquidate.
        let db_symbols: HashSet<&str> = db_rows.iter().map(|r| r.symbol.as_str()).collect();
        for (symbol, broker_pos) in &by_symbol {
            if db_symbols.contains(symbol.as_str()) {
                continue;
            }
            match self
                .broker
                .submit_market_order(symbol, OrderSide::Sell, broker_pos.qty)
                .await
            {
                Ok(fill) => {
                    summary.orphans_closed += 1;
                    warn!(
                        account = %self.account,
                        symbol = %symbol,
                        qty = broker_pos.qty,
                        exit_price = fill.avg_price,
                        reason = exit_reason::ORPHAN_CLEANUP,
                        "orphan broker position liquidated"
                    );
                }
                Err(e) => {
                    error!(account = %self.account, symbol = %symbol, error = %e, "orphan cleanup sell failed");
                }
            }
        }

        info!(
            account = %self.account,
            restored = summary.restored,
            crash_recovered = summary.crash_recovered,
            orphans_closed = summary.orphans_closed,
            "startup reconcile complete"
        );
        Ok(summary)
    }

    // -------------------------------------------------------------------------
    // Daily reset + queries
    // -------------------------------------------------------------------------

    /// New session day: fresh counters and a re-armed EOD flag. Open
    /// positions are untouched.
    pub fn reset_daily(&self) {
        *self.daily.write() = DailyStats::default();
        self.closed_today.store(false, Ordering::Relaxed);
        self.pending_close.lock().clear();
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.active.read().values().cloned().collect()
    }

    pub fn open_symbols(&self) -> HashSet<String> {
        self.active.read().keys().cloned().collect()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.active.read().get(symbol).cloned()
    }

    pub fn daily_stats(&self) -> DailyStats {
        *self.daily.read()
    }

    pub fn persistence_errors(&self) -> u64 {
        self.persistence_errors.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("account", &self.account)
            .field("active", &self.active.read().len())
            .field("pending", &self.pending.read().len())
            .finish()
    }
}
