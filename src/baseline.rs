// =============================================================================
// Baseline Provider — per-symbol expected notional from 20 days of history
// =============================================================================
//
// Loaded once at startup from `intraday_baselines_30m`. Bucket rows are
// rolled up per trading day and the 20 most recent daily totals are averaged
// (the hot path compares a 60 s window against a daily-scale number, not a
// per-bucket one). Symbols with no history fall back to a fixed $50K.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::config::{BASELINE_FALLBACK_NOTIONAL, BASELINE_LOOKBACK_DAYS};

/// One historical bucket row as read from the baseline store.
#[derive(Debug, Clone)]
pub struct BaselineHistoryRow {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub notional: f64,
}

/// Read-only baseline lookup for the detector.
pub struct BaselineProvider {
    baselines: HashMap<String, f64>,
    fallback: f64,
}

impl BaselineProvider {
    /// Build from history rows. Rows may arrive in any order and span more
    /// than the lookback; only the most recent `BASELINE_LOOKBACK_DAYS`
    /// trading days per symbol contribute.
    pub fn from_rows(rows: &[BaselineHistoryRow]) -> Self {
        // symbol -> date -> daily notional total.
        let mut daily: HashMap<&str, BTreeMap<NaiveDate, f64>> = HashMap::new();
        for row in rows {
            *daily
                .entry(row.symbol.as_str())
                .or_default()
                .entry(row.trade_date)
                .or_insert(0.0) += row.notional;
        }

        let mut baselines = HashMap::with_capacity(daily.len());
        for (symbol, days) in daily {
            let totals: Vec<f64> = days
                .values()
                .rev()
                .take(BASELINE_LOOKBACK_DAYS)
                .copied()
                .collect();
            if !totals.is_empty() {
                let mean = totals.iter().sum::<f64>() / totals.len() as f64;
                baselines.insert(symbol.to_string(), mean);
            }
        }

        Self {
            baselines,
            fallback: BASELINE_FALLBACK_NOTIONAL,
        }
    }

    pub fn empty() -> Self {
        Self {
            baselines: HashMap::new(),
            fallback: BASELINE_FALLBACK_NOTIONAL,
        }
    }

    /// Expected daily notional for a symbol, or the fallback.
    pub fn baseline(&self, symbol: &str) -> f64 {
        self.baselines.get(symbol).copied().unwrap_or(self.fallback)
    }

    /// Symbols with a real (non-fallback) baseline.
    pub fn known_symbols(&self) -> usize {
        self.baselines.len()
    }

    #[cfg(test)]
    pub fn with_baselines(baselines: HashMap<String, f64>) -> Self {
        Self {
            baselines,
            fallback: BASELINE_FALLBACK_NOTIONAL,
        }
    }
}
