// =============================================================================
// Engulfing Checker — Account B's bullish confirmation gate
// =============================================================================
//
// Two sources: the shared `engulfing_scores` store (most recent 5-minute
// bullish row inside the lookback) and the preloaded daily watchlist (1D
// patterns from the last 20 hours, O(1) membership). The check never fails
// the calling flow: a database error reads as "no confirmation".
//
// Any pattern strength confirms; the strength is only carried along for
// later analysis.
// =============================================================================

use serde::Serialize;

/// Strength label attached to a stored pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatternStrength {
    Strong,
    Moderate,
    Weak,
}

impl PatternStrength {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "strong" => Some(Self::Strong),
            "moderate" => Some(Self::Moderate),
            "weak" => Some(Self::Weak),
            _ => None,
        }
    }
}

/// Result of the Account B lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngulfingCheck {
    pub present: bool,
    pub strength: Option<PatternStrength>,
}

impl EngulfingCheck {
    pub fn absent() -> Self {
        Self {
            present: false,
            strength: None,
        }
    }
}

/// Combine the store lookup with the daily watchlist. `query_result` is the
/// outcome of the 5-minute row query; an error collapses to absent.
pub fn interpret(
    query_result: anyhow::Result<Option<String>>,
    on_daily_watchlist: bool,
) -> EngulfingCheck {
    match query_result {
        Ok(Some(raw_strength)) => EngulfingCheck {
            present: true,
            strength: PatternStrength::parse(&raw_strength),
        },
        Ok(None) => EngulfingCheck {
            present: on_daily_watchlist,
            strength: None,
        },
        Err(_) => EngulfingCheck::absent(),
    }
}
