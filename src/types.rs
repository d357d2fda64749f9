// =============================================================================
// Shared types used across the Flowhawk UOA engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// The two independent paper accounts.
///
/// Account A takes every signal that clears the filter chain. Account B
/// requires a recent 5-minute bullish engulfing confirmation on top of the
/// score gate and skips the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountId {
    A,
    B,
}

impl AccountId {
    /// Per-account paper trade log table.
    pub fn trade_log_table(&self) -> &'static str {
        match self {
            Self::A => "paper_trades_log",
            Self::B => "paper_trades_log_b",
        }
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Call or put, decoded from the OCC symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    pub fn as_char(&self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// A single options trade off the firehose, already decoded. Transient:
/// consumed by the aggregators and dropped.
#[derive(Debug, Clone)]
pub struct OptionTrade {
    /// Raw OCC symbol as delivered (prefix stripped), used for
    /// unique-contract counting.
    pub occ_symbol: String,
    pub underlying: String,
    pub right: OptionRight,
    pub strike: f64,
    pub expiry: chrono::NaiveDate,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub price: f64,
    pub size: u64,
    /// `price × size × 100` (equity option multiplier).
    pub notional: f64,
    pub is_sweep: bool,
}

impl OptionTrade {
    pub fn new(
        occ: crate::occ::OccSymbol,
        occ_symbol: String,
        ts: chrono::DateTime<chrono::Utc>,
        price: f64,
        size: u64,
        conditions: &[i32],
    ) -> Self {
        let is_sweep = conditions
            .iter()
            .any(|c| crate::config::SWEEP_CONDITION_CODES.contains(c));
        Self {
            occ_symbol,
            underlying: occ.underlying,
            right: occ.right,
            strike: occ.strike,
            expiry: occ.expiry,
            ts,
            price,
            size,
            notional: price * size as f64 * 100.0,
            is_sweep,
        }
    }
}

/// Close reasons written to the paper trade log. Stored as plain strings;
/// these constants are the only values the engine produces.
pub mod exit_reason {
    pub const HARD_STOP: &str = "hard_stop";
    pub const EOD: &str = "eod";
    pub const CRASH_RECOVERY: &str = "crash_recovery";
    pub const ORPHAN_CLEANUP: &str = "orphan_cleanup";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_trade_log_tables() {
        assert_eq!(AccountId::A.trade_log_table(), "paper_trades_log");
        assert_eq!(AccountId::B.trade_log_table(), "paper_trades_log_b");
    }

    #[test]
    fn right_chars() {
        assert_eq!(OptionRight::Call.as_char(), 'C');
        assert_eq!(OptionRight::Put.as_char(), 'P');
    }
}
