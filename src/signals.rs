// =============================================================================
// Signal Generator — trigger enrichment ahead of the filter chain
// =============================================================================
//
// Everything the filter chain consults must already be on the `Signal` when
// it arrives: the chain itself does no I/O. Enrichment is best-effort, each
// source with its own timeout:
//
//   spot price   broker snapshot (2 s), falling back to the TA last close
//   TA fields    daily-close cache before 09:35 ET, intraday 5-min cache
//                after; on a full miss, 120 days of daily bars (3 s) are
//                fetched and the fields computed locally
//   GEX          opaque metadata from the bulk-loaded map, never filtered on
//
// A signal with null TA is still emitted; the chain rejects it with an
// explicit reason rather than the generator guessing.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::aggregator::WindowStats;
use crate::broker::Broker;
use crate::config::{SPOT_TIMEOUT_SECS, TA_BARS_LOOKBACK_DAYS, TA_TIMEOUT_SECS};
use crate::refdata::ReferenceData;
use crate::scorer::{self, ScoreBreakdown};
use crate::session::SessionClock;
use crate::ta::{self, DailyTaCache, IntradayTaCache, TaSnapshot};
use crate::uoa_detector::Trigger;

/// A cache handle that swaps wholesale on refresh; readers clone the inner
/// Arc and never observe a partial update.
pub type Shared<T> = Arc<RwLock<Arc<T>>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(Arc::new(value)))
}

/// A scored, enriched trigger ready for admission.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub detected_at: DateTime<Utc>,
    pub stats: WindowStats,
    pub volume_ratio: f64,
    pub baseline_notional: f64,
    pub score: ScoreBreakdown,
    pub ta: TaSnapshot,
    pub trend: Option<&'static str>,
    /// 0.0 when no price source resolved; the chain fails it as `no_price`.
    pub spot_price: f64,
    pub metadata: serde_json::Value,
}

impl Signal {
    pub fn score_total(&self) -> u8 {
        self.score.total()
    }
}

/// The admission verdict persisted for every evaluated signal.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub signal: Signal,
    pub passed_all_filters: bool,
    pub rejection_reason: Option<String>,
}

pub struct SignalGenerator {
    broker: Arc<dyn Broker>,
    daily_ta: Shared<DailyTaCache>,
    intraday_ta: Shared<IntradayTaCache>,
    refdata: Shared<ReferenceData>,
    clock: SessionClock,
}

impl SignalGenerator {
    pub fn new(
        broker: Arc<dyn Broker>,
        daily_ta: Shared<DailyTaCache>,
        intraday_ta: Shared<IntradayTaCache>,
        refdata: Shared<ReferenceData>,
        clock: SessionClock,
    ) -> Self {
        Self {
            broker,
            daily_ta,
            intraday_ta,
            refdata,
            clock,
        }
    }

    /// Enrich a trigger into a `Signal`. Never fails; missing sources leave
    /// their fields empty.
    pub async fn generate(&self, trigger: &Trigger) -> Signal {
        let symbol = trigger.symbol.as_str();
        let score = scorer::score(&trigger.stats, trigger.volume_ratio);

        let ta = self.resolve_ta(symbol, trigger.ts).await;
        let spot_price = self.resolve_spot(symbol, &ta).await;

        let refdata = self.refdata.read().clone();
        let mut metadata = serde_json::Map::new();
        if let Some(gex) = refdata.gex(symbol) {
            metadata.insert("gex".to_string(), gex.clone());
        }
        if let Some(sector) = refdata.sector(symbol) {
            metadata.insert(
                "sector".to_string(),
                serde_json::Value::String(sector.to_string()),
            );
        }

        Signal {
            symbol: trigger.symbol.clone(),
            detected_at: trigger.ts,
            stats: trigger.stats.clone(),
            volume_ratio: trigger.volume_ratio,
            baseline_notional: trigger.baseline_notional,
            score,
            trend: ta::trend_label(&ta),
            ta,
            spot_price,
            metadata: serde_json::Value::Object(metadata),
        }
    }

    /// Resolve TA fields for a symbol, preferring intraday values after the
    /// 09:35 cutover. The daily cache always supplies sma_50 and last_close;
    /// the intraday cache carries only rsi_14 / sma_20.
    async fn resolve_ta(&self, symbol: &str, now: DateTime<Utc>) -> TaSnapshot {
        let daily = self.daily_ta.read().clone();
        let mut snapshot = daily
            .get(symbol)
            .map(|row| TaSnapshot {
                rsi_14: row.rsi_14,
                sma_20: row.sma_20,
                sma_50: row.sma_50,
                last_close: row.close_price,
            })
            .unwrap_or_default();

        if !self.clock.before_intraday_cutover(now) {
            let intraday = self.intraday_ta.read().clone();
            if let Some(row) = intraday.get(symbol) {
                // The intraday table refreshes every five minutes; a row
                // older than three refresh cycles is stale.
                let fresh =
                    now.signed_duration_since(row.snapshot_ts) <= Duration::minutes(15);
                if fresh {
                    if row.rsi_14.is_some() {
                        snapshot.rsi_14 = row.rsi_14;
                    }
                    if row.sma_20.is_some() {
                        snapshot.sma_20 = row.sma_20;
                    }
                    if snapshot.last_close.is_none() {
                        snapshot.last_close = row.price;
                    }
                }
            }
        }

        if snapshot.is_empty() {
            snapshot = self.ta_from_bars(symbol).await;
        }
        snapshot
    }

    /// Bars REST fallback: 120 days of daily closes, computed locally.
    async fn ta_from_bars(&self, symbol: &str) -> TaSnapshot {
        let symbols = vec![symbol.to_string()];
        let fetch = self.broker.daily_bars(&symbols, TA_BARS_LOOKBACK_DAYS);

        match tokio::time::timeout(std::time::Duration::from_secs(TA_TIMEOUT_SECS), fetch).await
        {
            Ok(Ok(mut bars)) => {
                let closes: Vec<f64> = bars
                    .remove(symbol)
                    .unwrap_or_default()
                    .iter()
                    .map(|b| b.close)
                    .collect();
                if closes.is_empty() {
                    debug!(symbol, "bars fallback returned no closes");
                    TaSnapshot::default()
                } else {
                    ta::snapshot_from_closes(&closes)
                }
            }
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "bars fallback failed");
                TaSnapshot::default()
            }
            Err(_) => {
                warn!(symbol, "bars fallback timed out");
                TaSnapshot::default()
            }
        }
    }

    /// Spot via snapshot with a hard timeout; TA last close as fallback.
    async fn resolve_spot(&self, symbol: &str, ta: &TaSnapshot) -> f64 {
        let fetch = self.broker.snapshot(symbol);
        match tokio::time::timeout(std::time::Duration::from_secs(SPOT_TIMEOUT_SECS), fetch)
            .await
        {
            Ok(Ok(snap)) if snap.price > 0.0 => snap.price,
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                debug!(symbol, "snapshot unavailable, using TA last close");
                ta.last_close.unwrap_or(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::broker::DailyBar;
    use crate::ta::DailyTaRow;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::collections::HashMap;

    fn clock() -> SessionClock {
        SessionClock::new(New_York)
    }

    fn afternoon() -> DateTime<Utc> {
        // 14:00 ET on an EDT date.
        Utc.with_ymd_and_hms(2024, 6, 18, 18, 0, 0).unwrap()
    }

    fn trigger(symbol: &str, ts: DateTime<Utc>) -> Trigger {
        Trigger {
            symbol: symbol.to_string(),
            ts,
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
        }
    }

    fn generator(broker: Arc<MockBroker>, daily: DailyTaCache) -> SignalGenerator {
        SignalGenerator::new(
            broker,
            shared(daily),
            shared(IntradayTaCache::new()),
            shared(ReferenceData::minimal()),
            clock(),
        )
    }

    fn daily_row(rsi: f64, sma20: f64, sma50: f64, close: f64) -> DailyTaRow {
        DailyTaRow {
            rsi_14: Some(rsi),
            sma_20: Some(sma20),
            sma_50: Some(sma50),
            close_price: Some(close),
        }
    }

    #[tokio::test]
    async fn enriches_from_snapshot_and_daily_cache() {
        let broker = Arc::new(MockBroker::new());
        broker.set_snapshot("NET", 185.0);

        let mut daily = DailyTaCache::new();
        daily.insert("NET".to_string(), daily_row(42.0, 180.0, 170.0, 184.0));

        let generator = generator(broker, daily);
        let signal = generator.generate(&trigger("NET", afternoon())).await;

        assert!((signal.spot_price - 185.0).abs() < 1e-9);
        assert_eq!(signal.ta.rsi_14, Some(42.0));
        assert_eq!(signal.ta.sma_50, Some(170.0));
        assert_eq!(signal.trend, Some("bullish"));
        assert_eq!(signal.score_total(), 13);
    }

    #[tokio::test]
    async fn spot_falls_back_to_last_close() {
        // No snapshot configured: the mock errors and last_close wins.
        let broker = Arc::new(MockBroker::new());
        let mut daily = DailyTaCache::new();
        daily.insert("NET".to_string(), daily_row(42.0, 180.0, 170.0, 184.0));

        let generator = generator(broker, daily);
        let signal = generator.generate(&trigger("NET", afternoon())).await;
        assert!((signal.spot_price - 184.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn null_ta_and_no_price_still_emits() {
        let broker = Arc::new(MockBroker::new());
        let generator = generator(broker, DailyTaCache::new());
        let signal = generator.generate(&trigger("NET", afternoon())).await;
        assert!(signal.ta.is_empty());
        assert!((signal.spot_price - 0.0).abs() < 1e-9);
        assert_eq!(signal.trend, None);
    }

    #[tokio::test]
    async fn bars_fallback_computes_ta() {
        let broker = Arc::new(MockBroker::new());
        // 60 ascending closes: enough for rsi/sma20/sma50.
        let bars: Vec<DailyBar> = (1..=60)
            .map(|i| DailyBar {
                date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i),
                open: i as f64,
                high: i as f64,
                low: i as f64,
                close: i as f64,
                volume: 1000.0,
            })
            .collect();
        broker.bars.lock().insert("NET".to_string(), bars);

        let generator = generator(broker, DailyTaCache::new());
        let signal = generator.generate(&trigger("NET", afternoon())).await;
        assert!(signal.ta.rsi_14.is_some());
        assert!(signal.ta.sma_20.is_some());
        assert!(signal.ta.sma_50.is_some());
        assert_eq!(signal.ta.last_close, Some(60.0));
        // Snapshot still missing, so spot falls back to the computed close.
        assert!((signal.spot_price - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn intraday_overrides_after_cutover() {
        let broker = Arc::new(MockBroker::new());
        broker.set_snapshot("NET", 185.0);

        let mut daily = DailyTaCache::new();
        daily.insert("NET".to_string(), daily_row(42.0, 180.0, 170.0, 184.0));

        let mut intraday = IntradayTaCache::new();
        intraday.insert(
            "NET".to_string(),
            crate::ta::IntradayTaRow {
                rsi_14: Some(55.0),
                sma_20: Some(183.0),
                price: Some(185.0),
                snapshot_ts: afternoon(),
            },
        );

        let generator = SignalGenerator::new(
            broker,
            shared(daily),
            shared(intraday),
            shared(ReferenceData::minimal()),
            clock(),
        );

        let signal = generator.generate(&trigger("NET", afternoon())).await;
        assert_eq!(signal.ta.rsi_14, Some(55.0));
        assert_eq!(signal.ta.sma_20, Some(183.0));
        // Daily cache still supplies the slow fields.
        assert_eq!(signal.ta.sma_50, Some(170.0));

        // Before the cutover the intraday cache is ignored.
        let morning = Utc.with_ymd_and_hms(2024, 6, 18, 13, 32, 0).unwrap(); // 09:32 ET
        let signal = generator.generate(&trigger("NET", morning)).await;
        assert_eq!(signal.ta.rsi_14, Some(42.0));
    }

    #[tokio::test]
    async fn stale_intraday_rows_are_ignored() {
        let broker = Arc::new(MockBroker::new());
        broker.set_snapshot("NET", 185.0);

        let mut daily = DailyTaCache::new();
        daily.insert("NET".to_string(), daily_row(42.0, 180.0, 170.0, 184.0));

        let mut intraday = IntradayTaCache::new();
        intraday.insert(
            "NET".to_string(),
            crate::ta::IntradayTaRow {
                rsi_14: Some(55.0),
                sma_20: Some(183.0),
                price: Some(185.0),
                // An hour old: three missed refresh cycles.
                snapshot_ts: afternoon() - chrono::Duration::hours(1),
            },
        );

        let generator = SignalGenerator::new(
            broker,
            shared(daily),
            shared(intraday),
            shared(ReferenceData::minimal()),
            clock(),
        );

        let signal = generator.generate(&trigger("NET", afternoon())).await;
        assert_eq!(signal.ta.rsi_14, Some(42.0));
        assert_eq!(signal.ta.sma_20, Some(180.0));
    }
}
