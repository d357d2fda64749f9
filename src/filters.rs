// =============================================================================
// Filter Chain — ordered admission predicates over an enriched Signal
// =============================================================================
//
// The chain is pure: every lookup it makes is against memory-resident caches
// populated before the hot path (TA enrichment happens in the signal
// generator, reference data at startup). The first failing predicate
// short-circuits with its reason string; the engine persists an evaluation
// row either way.
//
// Two admission predicates from the same contract — the sector concentration
// cap and the market-regime gate — depend on live account and market state,
// so they are enforced inside the position manager. Their reason strings
// live here so the full admission vocabulary is in one place.
// =============================================================================

use chrono::NaiveDate;

use crate::config::{
    CROWDED_MENTIONS_MAX, FILTER_MIN_NOTIONAL, MIN_SCORE, RSI_THRESHOLD_BOUNCE,
    RSI_THRESHOLD_NORMAL,
};
use crate::refdata::ReferenceData;
use crate::signals::Signal;

/// Admission verdict for one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Pass,
    Reject(&'static str),
}

impl FilterOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Pass => None,
            Self::Reject(reason) => Some(reason),
        }
    }
}

// Rejection reasons, in chain order.
pub const ETF_EXCLUDED: &str = "etf_excluded";
pub const SCORE_LOW: &str = "score<10";
pub const NO_PRICE: &str = "no_price";
pub const TA_MISSING: &str = "ta_missing";
pub const BELOW_SMA20: &str = "below_sma20";
pub const RSI_HIGH: &str = "rsi_high";
pub const BELOW_SMA50: &str = "below_sma50";
pub const NOTIONAL_LOW: &str = "notional_low";
pub const CROWDED_TRADE: &str = "crowded_trade";
pub const EARNINGS_NEAR: &str = "earnings_near";
// Enforced at the position-manager stage.
pub const SECTOR_CONCENTRATION: &str = "sector_concentration";
pub const MARKET_REGIME_WEAK: &str = "market_regime_weak";

/// RSI ceiling for the day: relaxed to 60 on a bounce day, 50 otherwise.
pub fn effective_rsi_threshold(bounce_day: bool) -> f64 {
    if bounce_day {
        RSI_THRESHOLD_BOUNCE
    } else {
        RSI_THRESHOLD_NORMAL
    }
}

/// Run the chain. `today` is the session trade date, `bounce_day` the flag
/// computed once at the daily reset.
pub fn evaluate(
    signal: &Signal,
    refdata: &ReferenceData,
    bounce_day: bool,
    today: NaiveDate,
) -> FilterOutcome {
    // 1. ETF exclusion — index flow is hedging noise, not conviction.
    if refdata.is_etf(&signal.symbol) {
        return FilterOutcome::Reject(ETF_EXCLUDED);
    }

    // 2. Score floor.
    if signal.score_total() < MIN_SCORE {
        return FilterOutcome::Reject(SCORE_LOW);
    }

    // 3a. A usable spot price is a precondition for every trend check.
    if signal.spot_price <= 0.0 {
        return FilterOutcome::Reject(NO_PRICE);
    }

    // 3b. Trend: above the 20-day average.
    let Some(sma_20) = signal.ta.sma_20 else {
        return FilterOutcome::Reject(TA_MISSING);
    };
    if signal.spot_price <= sma_20 {
        return FilterOutcome::Reject(BELOW_SMA20);
    }

    // 4. RSI ceiling, relaxed on bounce days.
    let Some(rsi_14) = signal.ta.rsi_14 else {
        return FilterOutcome::Reject(TA_MISSING);
    };
    if rsi_14 >= effective_rsi_threshold(bounce_day) {
        return FilterOutcome::Reject(RSI_HIGH);
    }

    // 5. Momentum: above the 50-day average.
    let Some(sma_50) = signal.ta.sma_50 else {
        return FilterOutcome::Reject(TA_MISSING);
    };
    if signal.spot_price <= sma_50 {
        return FilterOutcome::Reject(BELOW_SMA50);
    }

    // 6. Notional floor.
    if signal.stats.notional_total < FILTER_MIN_NOTIONAL {
        return FilterOutcome::Reject(NOTIONAL_LOW);
    }

    // 7. Crowded trade: heavy coverage or negative sentiment. Missing media
    // features pass — unknown is not crowded.
    if let Some(media) = refdata.media(&signal.symbol) {
        if media.mentions >= CROWDED_MENTIONS_MAX || media.sentiment < 0.0 {
            return FilterOutcome::Reject(CROWDED_TRADE);
        }
    }

    // 8. Earnings proximity.
    if refdata.earnings_near(&signal.symbol, today) {
        return FilterOutcome::Reject(EARNINGS_NEAR);
    }

    FilterOutcome::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::WindowStats;
    use crate::refdata::MediaFeatures;
    use crate::scorer::ScoreBreakdown;
    use crate::ta::TaSnapshot;
    use chrono::{TimeZone, Utc};
    use std::collections::{HashMap, HashSet};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 18).unwrap()
    }

    /// The S2 shape: score 13, healthy TA, spot above both averages.
    fn passing_signal() -> Signal {
        Signal {
            symbol: "NET".to_string(),
            detected_at: Utc.with_ymd_and_hms(2024, 6, 18, 15, 0, 0).unwrap(),
            stats: WindowStats {
                notional_total: 400_000.0,
                contracts_total: 200,
                call_pct: 0.90,
                sweep_pct: 0.60,
                unique_strikes: 2,
                ..WindowStats::default()
            },
            volume_ratio: 8.0,
            baseline_notional: 50_000.0,
            score: ScoreBreakdown {
                volume_ratio: 1,
                call_pct: 3,
                sweep_pct: 3,
                strike_concentration: 3,
                notional: 3,
            },
            ta: TaSnapshot {
                rsi_14: Some(42.0),
                sma_20: Some(180.0),
                sma_50: Some(170.0),
                last_close: Some(184.0),
            },
            trend: Some("bullish"),
            spot_price: 185.0,
            metadata: serde_json::Value::Null,
        }
    }

    fn refdata() -> ReferenceData {
        ReferenceData::minimal()
    }

    fn refdata_with_media(symbol: &str, mentions: i64, sentiment: f64) -> ReferenceData {
        let mut media = HashMap::new();
        media.insert(symbol.to_string(), MediaFeatures { mentions, sentiment });
        ReferenceData::new(HashMap::new(), HashMap::new(), media, HashMap::new(), HashSet::new())
    }

    #[test]
    fn s2_signal_passes() {
        let outcome = evaluate(&passing_signal(), &refdata(), false, today());
        assert_eq!(outcome, FilterOutcome::Pass);
        assert!(outcome.passed());
        assert_eq!(outcome.reason(), None);
    }

    #[test]
    fn etf_rejected_first() {
        let mut signal = passing_signal();
        signal.symbol = "SPY".to_string();
        // Even with a junk score, the ETF reason wins — it is checked first.
        signal.score = ScoreBreakdown::default();
        let outcome = evaluate(&signal, &refdata(), false, today());
        assert_eq!(outcome.reason(), Some(ETF_EXCLUDED));
    }

    #[test]
    fn score_floor() {
        let mut signal = passing_signal();
        signal.score.notional = 0; // 13 -> 10 still passes
        assert!(evaluate(&signal, &refdata(), false, today()).passed());
        signal.score.volume_ratio = 0; // 9 fails
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(SCORE_LOW)
        );
    }

    #[test]
    fn missing_price_rejected() {
        let mut signal = passing_signal();
        signal.spot_price = 0.0;
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(NO_PRICE)
        );
    }

    #[test]
    fn missing_ta_rejected() {
        let mut signal = passing_signal();
        signal.ta = TaSnapshot::default();
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(TA_MISSING)
        );
    }

    #[test]
    fn below_sma20_rejected() {
        let mut signal = passing_signal();
        signal.spot_price = 179.0;
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(BELOW_SMA20)
        );
    }

    #[test]
    fn rsi_boundaries_normal_day() {
        let mut signal = passing_signal();
        signal.ta.rsi_14 = Some(49.999);
        assert!(evaluate(&signal, &refdata(), false, today()).passed());
        signal.ta.rsi_14 = Some(50.0);
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(RSI_HIGH)
        );
    }

    #[test]
    fn rsi_boundaries_bounce_day() {
        let mut signal = passing_signal();
        signal.ta.rsi_14 = Some(59.999);
        assert!(evaluate(&signal, &refdata(), true, today()).passed());
        signal.ta.rsi_14 = Some(60.0);
        assert_eq!(
            evaluate(&signal, &refdata(), true, today()).reason(),
            Some(RSI_HIGH)
        );
    }

    #[test]
    fn bounce_day_relaxes_threshold() {
        // S5: rsi 54 passes only with the bounce flag set.
        let mut signal = passing_signal();
        signal.ta.rsi_14 = Some(54.0);
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(RSI_HIGH)
        );
        assert!(evaluate(&signal, &refdata(), true, today()).passed());
    }

    #[test]
    fn below_sma50_rejected() {
        let mut signal = passing_signal();
        signal.ta.sma_20 = Some(160.0);
        signal.spot_price = 165.0; // above sma20, below sma50 (170)
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(BELOW_SMA50)
        );
    }

    #[test]
    fn notional_floor() {
        let mut signal = passing_signal();
        signal.stats.notional_total = 49_999.0;
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(NOTIONAL_LOW)
        );
    }

    #[test]
    fn crowded_trade_rules() {
        let signal = passing_signal();
        // mentions 2, sentiment +0.1 passes (S2 media shape).
        let rd = refdata_with_media("NET", 2, 0.1);
        assert!(evaluate(&signal, &rd, false, today()).passed());
        // Heavy coverage fails.
        let rd = refdata_with_media("NET", 5, 0.5);
        assert_eq!(evaluate(&signal, &rd, false, today()).reason(), Some(CROWDED_TRADE));
        // Negative sentiment fails.
        let rd = refdata_with_media("NET", 1, -0.2);
        assert_eq!(evaluate(&signal, &rd, false, today()).reason(), Some(CROWDED_TRADE));
        // Missing media passes.
        assert!(evaluate(&signal, &refdata(), false, today()).passed());
    }

    #[test]
    fn earnings_proximity_rejected() {
        let signal = passing_signal();
        let mut earnings = HashMap::new();
        earnings.insert(
            "NET".to_string(),
            vec![NaiveDate::from_ymd_opt(2024, 6, 19).unwrap()],
        );
        let rd = ReferenceData::new(
            HashMap::new(),
            earnings,
            HashMap::new(),
            HashMap::new(),
            HashSet::new(),
        );
        assert_eq!(
            evaluate(&signal, &rd, false, today()).reason(),
            Some(EARNINGS_NEAR)
        );
    }

    #[test]
    fn every_rejection_has_one_reason() {
        // A failing signal reports exactly the first failed predicate.
        let mut signal = passing_signal();
        signal.score = ScoreBreakdown::default();
        signal.spot_price = 0.0;
        // Both score and price fail, but score is checked first.
        assert_eq!(
            evaluate(&signal, &refdata(), false, today()).reason(),
            Some(SCORE_LOW)
        );
    }
}
