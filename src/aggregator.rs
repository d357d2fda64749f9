// =============================================================================
// Trade Aggregator — per-underlying rolling 60-second window
// =============================================================================
//
// `add_trade` appends and bumps running sums; nothing is evicted on the hot
// path. `stats` first drops entries older than the window and, only if
// something was dropped, recomputes the sums from the retained entries, so a
// scan always sees a consistent snapshot.
//
// Memory is bounded two ways: entries age out of the 60 s window, and a
// per-symbol soft cap drops the oldest entries (counted, never fatal) if one
// underlying floods faster than scans evict.
//
// The engine task owns this exclusively; there is no interior locking.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::config::{WINDOW_SECS, WINDOW_SOFT_CAP};
use crate::types::{OptionRight, OptionTrade};

/// One retained window entry. A compact projection of the trade; the full
/// `OptionTrade` is not kept.
#[derive(Debug, Clone)]
struct WindowEntry {
    ts: DateTime<Utc>,
    notional: f64,
    right: OptionRight,
    strike: f64,
    is_sweep: bool,
    contracts: u64,
}

/// Running sums maintained alongside a symbol's window.
#[derive(Debug, Clone, Copy, Default)]
struct RunningSums {
    notional: f64,
    contracts: u64,
    prints: u64,
    calls_notional: f64,
    puts_notional: f64,
    sweep_notional: f64,
}

impl RunningSums {
    fn add(&mut self, e: &WindowEntry) {
        self.notional += e.notional;
        self.contracts += e.contracts;
        self.prints += 1;
        match e.right {
            OptionRight::Call => self.calls_notional += e.notional,
            OptionRight::Put => self.puts_notional += e.notional,
        }
        if e.is_sweep {
            self.sweep_notional += e.notional;
        }
    }

    fn sub(&mut self, e: &WindowEntry) {
        self.notional -= e.notional;
        self.contracts -= e.contracts;
        self.prints -= 1;
        match e.right {
            OptionRight::Call => self.calls_notional -= e.notional,
            OptionRight::Put => self.puts_notional -= e.notional,
        }
        if e.is_sweep {
            self.sweep_notional -= e.notional;
        }
    }
}

#[derive(Debug, Default)]
struct SymbolWindow {
    entries: VecDeque<WindowEntry>,
    sums: RunningSums,
}

/// Snapshot of one underlying's window, consumed by the detector and scorer.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WindowStats {
    pub notional_total: f64,
    pub contracts_total: u64,
    pub prints: u64,
    pub calls_notional: f64,
    pub puts_notional: f64,
    /// calls / (calls + puts); 0 when the window holds no directional notional.
    pub call_pct: f64,
    /// sweep notional / total notional.
    pub sweep_pct: f64,
    pub unique_strikes: usize,
    pub max_print_size: u64,
    pub avg_contracts_per_print: f64,
    pub trade_sizes: Vec<u64>,
}

/// Per-underlying sliding-window aggregator over the options firehose.
pub struct TradeAggregator {
    windows: HashMap<String, SymbolWindow>,
    window: Duration,
    soft_cap: usize,
    dropped_trades: u64,
}

impl TradeAggregator {
    pub fn new() -> Self {
        Self::with_limits(Duration::seconds(WINDOW_SECS), WINDOW_SOFT_CAP)
    }

    pub fn with_limits(window: Duration, soft_cap: usize) -> Self {
        Self {
            windows: HashMap::new(),
            window,
            soft_cap,
            dropped_trades: 0,
        }
    }

    /// Append a trade to its underlying's window. Entries arrive in
    /// non-decreasing `ts` order per underlying.
    pub fn add_trade(&mut self, trade: &OptionTrade) {
        let win = self.windows.entry(trade.underlying.clone()).or_default();

        if win.entries.len() >= self.soft_cap {
            // Backpressure: drop the oldest retained entry and keep counting.
            if let Some(old) = win.entries.pop_front() {
                win.sums.sub(&old);
                self.dropped_trades += 1;
            }
        }

        let entry = WindowEntry {
            ts: trade.ts,
            notional: trade.notional,
            right: trade.right,
            strike: trade.strike,
            is_sweep: trade.is_sweep,
            contracts: trade.size,
        };
        win.sums.add(&entry);
        win.entries.push_back(entry);
    }

    /// Evict stale entries for `symbol` and return a stats snapshot, or
    /// `None` if nothing remains in the window.
    pub fn stats(&mut self, symbol: &str, now: DateTime<Utc>) -> Option<WindowStats> {
        let cutoff = now - self.window;
        let win = self.windows.get_mut(symbol)?;

        let mut evicted = false;
        while matches!(win.entries.front(), Some(e) if e.ts < cutoff) {
            win.entries.pop_front();
            evicted = true;
        }

        if win.entries.is_empty() {
            self.windows.remove(symbol);
            return None;
        }

        if evicted {
            win.sums = RunningSums::default();
            for e in &win.entries {
                win.sums.add(e);
            }
        }

        let mut strikes: HashSet<u64> = HashSet::new();
        let mut max_print = 0u64;
        let mut sizes = Vec::with_capacity(win.entries.len());
        for e in &win.entries {
            strikes.insert((e.strike * 1000.0).round() as u64);
            max_print = max_print.max(e.contracts);
            sizes.push(e.contracts);
        }

        let s = win.sums;
        let directional = s.calls_notional + s.puts_notional;
        Some(WindowStats {
            notional_total: s.notional,
            contracts_total: s.contracts,
            prints: s.prints,
            calls_notional: s.calls_notional,
            puts_notional: s.puts_notional,
            call_pct: if directional > 0.0 {
                s.calls_notional / directional
            } else {
                0.0
            },
            sweep_pct: if s.notional > 0.0 {
                s.sweep_notional / s.notional
            } else {
                0.0
            },
            unique_strikes: strikes.len(),
            max_print_size: max_print,
            avg_contracts_per_print: if s.prints > 0 {
                s.contracts as f64 / s.prints as f64
            } else {
                0.0
            },
            trade_sizes: sizes,
        })
    }

    /// Symbols with at least one retained entry.
    pub fn active_symbols(&self) -> Vec<String> {
        self.windows.keys().cloned().collect()
    }

    /// Drop one symbol's window (daily rollover).
    pub fn reset(&mut self, symbol: &str) {
        self.windows.remove(symbol);
    }

    /// Drop every window (daily rollover).
    pub fn reset_all(&mut self) {
        self.windows.clear();
    }

    /// Trades dropped by the per-symbol soft cap since startup.
    pub fn dropped_trades(&self) -> u64 {
        self.dropped_trades
    }
}

impl Default for TradeAggregator {
    fn default() -> Self {
        Self::new()
    }
}
