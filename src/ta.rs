// =============================================================================
// Technical Analysis — cache types and indicator math for enrichment
// =============================================================================
//
// Two cache tiers feed signal enrichment:
//   - `DailyTaCache`: one row per symbol from the nightly precompute
//     (`ta_daily_close`), used before 09:35 ET and as the sma_50/last_close
//     source all day.
//   - `IntradayTaCache`: rsi_14 / sma_20 / price from `ta_intraday_5m`,
//     reloaded every five minutes and preferred after the cutover.
//
// When both caches miss, the enrichment path fetches 120 days of daily bars
// and computes the fields here. RSI uses Wilder's smoothing: seed the
// averages with the SMA of the first `period` deltas, then
//   avg = (prev_avg * (period - 1) + current) / period.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Fully resolved TA fields attached to a signal. Any field can be absent;
/// the filter chain rejects on what it needs.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TaSnapshot {
    pub rsi_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub last_close: Option<f64>,
}

impl TaSnapshot {
    pub fn is_empty(&self) -> bool {
        self.rsi_14.is_none() && self.sma_20.is_none() && self.sma_50.is_none()
    }
}

/// Nightly per-symbol TA row.
#[derive(Debug, Clone, Copy)]
pub struct DailyTaRow {
    pub rsi_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub close_price: Option<f64>,
}

/// Intraday 5-minute TA row.
#[derive(Debug, Clone, Copy)]
pub struct IntradayTaRow {
    pub rsi_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub price: Option<f64>,
    pub snapshot_ts: DateTime<Utc>,
}

pub type DailyTaCache = HashMap<String, DailyTaRow>;
pub type IntradayTaCache = HashMap<String, IntradayTaRow>;

/// Compute a full snapshot from a daily close series (bars REST fallback).
/// Closes are ordered oldest to newest.
pub fn snapshot_from_closes(closes: &[f64]) -> TaSnapshot {
    TaSnapshot {
        rsi_14: rsi(closes, 14),
        sma_20: sma(closes, 20),
        sma_50: sma(closes, 50),
        last_close: closes.last().copied(),
    }
}

/// Simple moving average of the trailing `period` closes.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let tail = &closes[closes.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

/// Latest RSI value via Wilder's smoothing, `None` on insufficient data.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
    }

    let value = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    value.is_finite().then_some(value)
}

/// Trend label from the resolved fields: price above both averages with the
/// averages stacked is bullish, below the short average is bearish.
pub fn trend_label(snapshot: &TaSnapshot) -> Option<&'static str> {
    let close = snapshot.last_close?;
    let sma_20 = snapshot.sma_20?;
    match snapshot.sma_50 {
        Some(sma_50) if close > sma_20 && sma_20 > sma_50 => Some("bullish"),
        _ if close < sma_20 => Some("bearish"),
        _ => Some("neutral"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_requires_enough_closes() {
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0, 2.0, 3.0], 3), Some(2.0));
        // Only the trailing window counts.
        assert_eq!(sma(&[100.0, 1.0, 2.0, 3.0], 3), Some(2.0));
    }

    #[test]
    fn rsi_insufficient_data() {
        let closes: Vec<f64> = (1..=14).map(f64::from).collect();
        assert_eq!(rsi(&closes, 14), None);
        assert_eq!(rsi(&[], 14), None);
        assert_eq!(rsi(&[1.0, 2.0, 3.0], 0), None);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        let v = rsi(&closes, 14).unwrap();
        assert!((v - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let closes: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        let v = rsi(&closes, 14).unwrap();
        assert!(v.abs() < 1e-9);
    }

    #[test]
    fn rsi_flat_is_neutral() {
        let closes = vec![100.0; 30];
        let v = rsi(&closes, 14).unwrap();
        assert!((v - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let v = rsi(&closes, 14).unwrap();
        assert!((0.0..=100.0).contains(&v));
    }

    #[test]
    fn snapshot_needs_fifty_closes_for_sma50() {
        let closes: Vec<f64> = (1..=49).map(f64::from).collect();
        let s = snapshot_from_closes(&closes);
        assert!(s.rsi_14.is_some());
        assert!(s.sma_20.is_some());
        assert_eq!(s.sma_50, None);
        assert_eq!(s.last_close, Some(49.0));
    }

    #[test]
    fn trend_labels() {
        let bull = TaSnapshot {
            rsi_14: Some(55.0),
            sma_20: Some(180.0),
            sma_50: Some(170.0),
            last_close: Some(185.0),
        };
        assert_eq!(trend_label(&bull), Some("bullish"));

        let bear = TaSnapshot {
            last_close: Some(160.0),
            ..bull
        };
        assert_eq!(trend_label(&bear), Some("bearish"));

        let none = TaSnapshot::default();
        assert_eq!(trend_label(&none), None);
    }

    #[test]
    fn empty_snapshot_detection() {
        assert!(TaSnapshot::default().is_empty());
        let s = TaSnapshot {
            rsi_14: Some(40.0),
            ..TaSnapshot::default()
        };
        assert!(!s.is_empty());
    }
}
