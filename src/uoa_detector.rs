// =============================================================================
// UOA Detector — window notional vs. baseline with per-symbol cooldown
// =============================================================================
//
// A symbol triggers when its 60 s window notional is at least
// `UOA_THRESHOLD` times its baseline, the window clears the minimum
// notional, and the symbol is out of cooldown. Triggers come back ordered
// by (ts, symbol) so downstream processing is deterministic.
//
// The detector never errors: a missing baseline is the fallback value, and
// symbols with empty windows are simply skipped.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::aggregator::{TradeAggregator, WindowStats};
use crate::baseline::BaselineProvider;
use crate::config::{COOLDOWN_MINUTES, MIN_WINDOW_NOTIONAL, UOA_THRESHOLD};

/// A detected volume anomaly, handed to the signal pipeline.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub stats: WindowStats,
    pub volume_ratio: f64,
    pub baseline_notional: f64,
}

pub struct UoaDetector {
    threshold: f64,
    cooldown: Duration,
    min_notional: f64,
    last_trigger: HashMap<String, DateTime<Utc>>,
}

impl UoaDetector {
    pub fn new() -> Self {
        Self::with_params(
            UOA_THRESHOLD,
            Duration::minutes(COOLDOWN_MINUTES),
            MIN_WINDOW_NOTIONAL,
        )
    }

    pub fn with_params(threshold: f64, cooldown: Duration, min_notional: f64) -> Self {
        Self {
            threshold,
            cooldown,
            min_notional,
            last_trigger: HashMap::new(),
        }
    }

    /// Scan every active symbol and emit triggers in (ts, symbol) order.
    pub fn scan(
        &mut self,
        aggregator: &mut TradeAggregator,
        baselines: &BaselineProvider,
        now: DateTime<Utc>,
    ) -> Vec<Trigger> {
        let mut symbols = aggregator.active_symbols();
        symbols.sort();

        let mut triggers = Vec::new();
        for symbol in symbols {
            let Some(stats) = aggregator.stats(&symbol, now) else {
                continue;
            };
            if stats.notional_total < self.min_notional {
                continue;
            }

            let baseline = baselines.baseline(&symbol);
            let ratio = stats.notional_total / baseline;
            if ratio < self.threshold {
                continue;
            }
            if !self.cooldown_elapsed(&symbol, now) {
                continue;
            }

            self.last_trigger.insert(symbol.clone(), now);
            info!(
                symbol = %symbol,
                notional = stats.notional_total,
                baseline,
                ratio = format!("{ratio:.2}"),
                prints = stats.prints,
                "UOA trigger"
            );
            triggers.push(Trigger {
                symbol,
                ts: now,
                stats,
                volume_ratio: ratio,
                baseline_notional: baseline,
            });
        }

        // All triggers in one scan share `ts`; the symbol sort above fixes
        // the processing order.
        triggers
    }

    /// A re-trigger at exactly the cooldown boundary is admitted.
    fn cooldown_elapsed(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.last_trigger.get(symbol) {
            Some(last) => now.signed_duration_since(*last) >= self.cooldown,
            None => true,
        }
    }

    /// Forget cooldown history (daily rollover).
    pub fn reset_daily(&mut self) {
        self.last_trigger.clear();
    }
}

impl Default for UoaDetector {
    fn default() -> Self {
        Self::new()
    }
}
