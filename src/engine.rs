// =============================================================================
// Engine — firehose routing, periodic loops, and the trigger pipeline
// =============================================================================
//
// The engine task exclusively owns the trade aggregator, bucket aggregator,
// and detector, so detector scans always see consistent windows. Everything
// downstream of a trigger (enrichment REST calls, DB writes, order
// placement) runs on spawned pipeline tasks and never blocks ingest.
//
// Periodic work, all multiplexed on the same select loop:
//   - detector scan every 10 s (plus an early scan after a large batch)
//   - bucket-boundary flush
//   - EOD check and the daily rollover
//
// Shutdown drains the buckets to the store and stops. Open positions are
// deliberately left alone — only the EOD path liquidates.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::aggregator::TradeAggregator;
use crate::app_state::{AppState, PipelineCounters};
use crate::baseline::BaselineProvider;
use crate::buckets::BucketAggregator;
use crate::config::{ENGULFING_LOOKBACK_MINUTES, ENGULFING_WATCHLIST_HOURS, MIN_SCORE, SCAN_INTERVAL_SECS};
use crate::db::{Db, SignalStore};
use crate::engulfing;
use crate::filters::{self, FilterOutcome};
use crate::positions::{OpenOutcome, PositionManager};
use crate::refdata::ReferenceData;
use crate::regime::MarketRegime;
use crate::session::SessionClock;
use crate::signals::{Evaluation, Shared, Signal, SignalGenerator};
use crate::types::OptionTrade;
use crate::uoa_detector::{Trigger, UoaDetector};

/// Trades ingested between scans before an early scan is forced.
const SCAN_BATCH_TRADES: usize = 5_000;
/// Bucket-boundary check cadence.
const FLUSH_CHECK_SECS: u64 = 15;
/// EOD / rollover check cadence.
const HOUSEKEEPING_SECS: u64 = 5;

// =============================================================================
// Trigger pipeline
// =============================================================================

/// Everything that happens after the detector fires, shared by reference
/// across per-trigger tasks.
pub struct TriggerPipeline {
    pub generator: SignalGenerator,
    pub store: Arc<dyn SignalStore>,
    pub refdata: Shared<ReferenceData>,
    pub regime: Arc<MarketRegime>,
    pub mgr_a: Arc<PositionManager>,
    pub mgr_b: Arc<PositionManager>,
    pub counters: Arc<PipelineCounters>,
    pub app: Arc<AppState>,
    pub clock: SessionClock,
}

impl TriggerPipeline {
    /// Process one trigger end to end: enrichment, chain, Account A, then
    /// the Account B engulfing path. Errors are counted, never propagated.
    pub async fn process(self: Arc<Self>, trigger: Trigger) {
        let symbol = trigger.symbol.clone();

        if let Err(e) = self.store.upsert_tracked_symbol(&symbol, trigger.ts).await {
            self.counters.db_write_errors.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %symbol, error = %e, "tracked-symbol upsert failed");
        }

        let signal = self.generator.generate(&trigger).await;
        let refdata = self.refdata.read().clone();
        let bounce_day = self.regime.is_bounce_day();
        let today = self.clock.trade_date(trigger.ts);

        let outcome = filters::evaluate(&signal, &refdata, bounce_day, today);
        self.counters.evaluations.fetch_add(1, Ordering::Relaxed);

        let evaluation = Evaluation {
            signal: signal.clone(),
            passed_all_filters: outcome.passed(),
            rejection_reason: outcome.reason().map(String::from),
        };
        if let Err(e) = self.store.insert_evaluation(&evaluation).await {
            self.counters.db_write_errors.fetch_add(1, Ordering::Relaxed);
            error!(symbol = %symbol, error = %e, "evaluation insert failed");
        }

        match outcome {
            FilterOutcome::Pass => {
                self.counters.passes.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.store.upsert_active_signal(&evaluation).await {
                    self.counters.db_write_errors.fetch_add(1, Ordering::Relaxed);
                    error!(symbol = %symbol, error = %e, "active-signal upsert failed");
                }
                self.admit(&self.mgr_a, &signal, &refdata).await;
            }
            FilterOutcome::Reject(reason) => {
                debug!(symbol = %symbol, reason, score = signal.score_total(), "signal rejected");
                self.app.push_rejection(&symbol, reason, signal.score_total());
            }
        }

        // Account B: score gate + engulfing confirmation only; it does not
        // wait on the ten-filter chain.
        if signal.score_total() >= MIN_SCORE {
            self.account_b_path(&trigger, &signal, &refdata).await;
        }

        self.app.increment_version();
    }

    async fn account_b_path(
        &self,
        trigger: &Trigger,
        signal: &Signal,
        refdata: &ReferenceData,
    ) {
        let symbol = trigger.symbol.as_str();
        let cutoff = trigger.ts - Duration::minutes(ENGULFING_LOOKBACK_MINUTES);
        let query = self.store.recent_bullish_engulfing(symbol, cutoff).await;
        let check = engulfing::interpret(query, refdata.on_engulfing_watchlist(symbol));

        if !check.present {
            debug!(symbol, "no engulfing confirmation, Account B skips");
            return;
        }

        info!(symbol, strength = ?check.strength, "engulfing confirmed for Account B");
        self.admit(&self.mgr_b, signal, refdata).await;
    }

    async fn admit(
        &self,
        manager: &Arc<PositionManager>,
        signal: &Signal,
        refdata: &ReferenceData,
    ) {
        let regime_ok = self.regime.regime_ok().await;
        let sector = refdata.sector(&signal.symbol).map(String::from);

        match manager.open_position(signal, sector, regime_ok).await {
            OpenOutcome::Opened(_) => {
                self.counters.opens.fetch_add(1, Ordering::Relaxed);
            }
            OpenOutcome::Rejected(reason) => {
                self.app.push_rejection(&signal.symbol, reason, signal.score_total());
            }
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct Engine {
    clock: SessionClock,
    eod_exit: NaiveTime,
    current_trade_date: NaiveDate,
    aggregator: TradeAggregator,
    buckets: BucketAggregator,
    detector: UoaDetector,
    baselines: BaselineProvider,
    db: Arc<Db>,
    pipeline: Arc<TriggerPipeline>,
    managers: Vec<Arc<PositionManager>>,
    trades_since_scan: usize,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: SessionClock,
        eod_exit: NaiveTime,
        baselines: BaselineProvider,
        db: Arc<Db>,
        pipeline: Arc<TriggerPipeline>,
        managers: Vec<Arc<PositionManager>>,
    ) -> Self {
        Self {
            clock,
            eod_exit,
            current_trade_date: clock.trade_date(Utc::now()),
            aggregator: TradeAggregator::new(),
            buckets: BucketAggregator::new(clock),
            detector: UoaDetector::new(),
            baselines,
            db,
            pipeline,
            managers,
            trades_since_scan: 0,
        }
    }

    /// Main loop; returns after the shutdown flush.
    pub async fn run(
        mut self,
        mut trades: mpsc::Receiver<OptionTrade>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("engine loop started");

        let mut scan = tokio::time::interval(std::time::Duration::from_secs(SCAN_INTERVAL_SECS));
        let mut flush = tokio::time::interval(std::time::Duration::from_secs(FLUSH_CHECK_SECS));
        let mut housekeeping =
            tokio::time::interval(std::time::Duration::from_secs(HOUSEKEEPING_SECS));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.shutdown_flush().await;
                    return;
                }
                trade = trades.recv() => {
                    match trade {
                        Some(trade) => self.handle_trade(&trade),
                        None => {
                            self.shutdown_flush().await;
                            return;
                        }
                    }
                }
                _ = scan.tick() => self.run_scan(Utc::now()),
                _ = flush.tick() => self.flush_buckets(Utc::now()),
                _ = housekeeping.tick() => self.housekeeping(Utc::now()).await,
            }
        }
    }

    /// Route one firehose trade. Cheap: two in-memory appends.
    fn handle_trade(&mut self, trade: &OptionTrade) {
        self.aggregator.add_trade(trade);
        self.buckets.record(trade);
        self.trades_since_scan += 1;
        if self.trades_since_scan >= SCAN_BATCH_TRADES {
            self.run_scan(Utc::now());
        }
    }

    /// Detector sweep; each trigger fans out to its own pipeline task.
    fn run_scan(&mut self, now: DateTime<Utc>) {
        self.trades_since_scan = 0;
        let triggers = self.detector.scan(&mut self.aggregator, &self.baselines, now);
        for trigger in triggers {
            self.pipeline
                .counters
                .triggers
                .fetch_add(1, Ordering::Relaxed);
            tokio::spawn(Arc::clone(&self.pipeline).process(trigger));
        }
    }

    /// Push closed buckets to the baseline store off the engine task.
    fn flush_buckets(&mut self, now: DateTime<Utc>) {
        let rows = self.buckets.drain_closed(now);
        if rows.is_empty() {
            return;
        }
        debug!(buckets = rows.len(), "flushing closed baseline buckets");
        let db = Arc::clone(&self.db);
        let counters = Arc::clone(&self.pipeline.counters);
        tokio::spawn(async move {
            if let Err(e) = db.upsert_baseline_rows(&rows).await {
                counters.db_write_errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "baseline bucket flush failed");
            }
        });
    }

    async fn housekeeping(&mut self, now: DateTime<Utc>) {
        // EOD liquidation: once the clock passes the exit time, close
        // everything per account until its daily flag latches. No upper
        // bound, so a process started after the window still liquidates.
        if self.clock.past_eod(now, self.eod_exit) {
            for manager in &self.managers {
                if !manager.eod_done() {
                    manager.close_all_eod().await;
                }
            }
        }

        // Daily rollover on the first tick of a new session date.
        let today = self.clock.trade_date(now);
        if today != self.current_trade_date {
            info!(date = %today, "daily reset");
            self.current_trade_date = today;
            self.daily_reset().await;
        }
    }

    async fn daily_reset(&mut self) {
        self.aggregator.reset_all();
        self.detector.reset_daily();
        for manager in &self.managers {
            manager.reset_daily();
        }
        self.pipeline.regime.refresh_bounce_day().await;

        // Reference caches reload off-task; readers keep the old Arc until
        // the swap.
        let db = Arc::clone(&self.db);
        let refdata = Arc::clone(&self.pipeline.refdata);
        tokio::spawn(async move {
            match load_reference_data(&db).await {
                Ok(fresh) => {
                    *refdata.write() = Arc::new(fresh);
                    info!("reference data refreshed");
                }
                Err(e) => warn!(error = %e, "reference data refresh failed, keeping previous caches"),
            }
        });
    }

    async fn shutdown_flush(&mut self) {
        let rows = self.buckets.drain_all();
        if !rows.is_empty() {
            info!(buckets = rows.len(), "shutdown bucket flush");
            if let Err(e) = self.db.upsert_baseline_rows(&rows).await {
                error!(error = %e, "shutdown bucket flush failed");
            }
        }
        info!(
            dropped_trades = self.aggregator.dropped_trades(),
            "engine loop stopped"
        );
    }
}

/// Bulk-load every reference cache. Used at boot and by the daily refresh.
pub async fn load_reference_data(db: &Db) -> anyhow::Result<ReferenceData> {
    let watchlist_cutoff = Utc::now() - Duration::hours(ENGULFING_WATCHLIST_HOURS);
    let refdata = ReferenceData::new(
        db.load_sectors().await?,
        db.load_earnings().await?,
        db.load_media().await?,
        db.load_gex().await?,
        db.load_engulfing_watchlist(watchlist_cutoff).await?,
    );
    let (sectors, earnings, media, gex, watchlist) = refdata.counts();
    info!(sectors, earnings, media, gex, watchlist, "reference data loaded");
    Ok(refdata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;
    use crate::db::memory::{MemorySignalStore, MemoryTradeStore};
    use crate::positions::AccountLimits;
    use crate::signals::shared;
    use crate::ta::{DailyTaCache, DailyTaRow, IntradayTaCache};
    use crate::types::AccountId;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    struct Fixture {
        pipeline: Arc<TriggerPipeline>,
        broker: Arc<MockBroker>,
        signal_store: Arc<MemorySignalStore>,
        trade_store: Arc<MemoryTradeStore>,
    }

    /// Wire a pipeline against mocks: NET priced at 185 with healthy TA,
    /// the S2 market shape.
    fn fixture() -> Fixture {
        let broker = Arc::new(MockBroker::new());
        broker.set_snapshot("NET", 185.0);
        // Healthy benchmark so the regime gate passes.
        broker.set_snapshot("SPY", 540.0);

        let mut daily = DailyTaCache::new();
        daily.insert(
            "NET".to_string(),
            DailyTaRow {
                rsi_14: Some(42.0),
                sma_20: Some(180.0),
                sma_50: Some(170.0),
                close_price: Some(184.0),
            },
        );

        let clock = SessionClock::new(New_York);
        let refdata = shared(ReferenceData::minimal());
        let signal_store = Arc::new(MemorySignalStore::new());
        let trade_store = Arc::new(MemoryTradeStore::new());
        let regime = Arc::new(MarketRegime::new(broker.clone()));

        let generator = SignalGenerator::new(
            broker.clone(),
            shared(daily),
            shared(IntradayTaCache::new()),
            Arc::clone(&refdata),
            clock,
        );

        let mgr_a = Arc::new(PositionManager::new(
            AccountId::A,
            broker.clone(),
            trade_store.clone(),
            AccountLimits::default(),
        ));
        let mgr_b = Arc::new(PositionManager::new(
            AccountId::B,
            broker.clone(),
            trade_store.clone(),
            AccountLimits::default(),
        ));

        let counters = Arc::new(PipelineCounters::default());
        let app = Arc::new(AppState::new(
            Arc::new(crate::firehose::FirehoseCounters::default()),
            Arc::clone(&counters),
            vec![mgr_a.clone(), mgr_b.clone()],
            Arc::clone(&regime),
        ));

        let pipeline = Arc::new(TriggerPipeline {
            generator,
            store: signal_store.clone(),
            refdata,
            regime,
            mgr_a,
            mgr_b,
            counters,
            app,
            clock,
        });

        Fixture {
            pipeline,
            broker,
            signal_store,
            trade_store,
        }
    }

    fn s2_trigger() -> Trigger {
        Trigger {
            symbol: "NET".to_string(),
            ts: Utc.with_ymd_and_hms(2024, 6, 18, 18, 0, 0).unwrap(), // 14:00 ET
            stats: crate::aggregator::WindowStats {
                notional_total: 400_000.0,
                contracts_total: 200,
                prints: 12,
                call_pct: 0.90,
                sweep_pct: 0.60,
                unique_strikes: 2,
                ..Default::default()
            },
            volume_ratio: 8.0,
            baseline_notional: 50_000.0,
        }
    }

    #[tokio::test]
    async fn s2_account_a_opens_b_blocked() {
        let fx = fixture();
        Arc::clone(&fx.pipeline).process(s2_trigger()).await;

        // Evaluation written and passed; passed signal recorded.
        let evals = fx.signal_store.evaluations.lock();
        assert_eq!(evals.len(), 1);
        assert!(evals[0].passed_all_filters);
        assert_eq!(fx.signal_store.active_signals.lock().len(), 1);
        assert_eq!(fx.signal_store.tracked.lock().len(), 1);

        // A opened, B skipped (no engulfing row).
        assert_eq!(fx.trade_store.open_rows(AccountId::A).len(), 1);
        assert!(fx.trade_store.open_rows(AccountId::B).is_empty());
        assert_eq!(fx.pipeline.mgr_a.open_positions().len(), 1);
        assert!(fx.pipeline.mgr_b.open_positions().is_empty());
    }

    #[tokio::test]
    async fn engulfing_confirmation_opens_account_b() {
        let fx = fixture();
        fx.signal_store
            .engulfing
            .lock()
            .insert("NET".to_string(), "moderate".to_string());

        Arc::clone(&fx.pipeline).process(s2_trigger()).await;

        assert_eq!(fx.trade_store.open_rows(AccountId::A).len(), 1);
        assert_eq!(fx.trade_store.open_rows(AccountId::B).len(), 1);
    }

    #[tokio::test]
    async fn account_b_ignores_chain_rejection() {
        // Account B needs only score + engulfing: a signal failing the RSI
        // filter still opens B.
        let fx = fixture();
        fx.signal_store
            .engulfing
            .lock()
            .insert("NET".to_string(), "strong".to_string());

        // Force an RSI rejection for the chain.
        {
            let mut daily = DailyTaCache::new();
            daily.insert(
                "NET".to_string(),
                DailyTaRow {
                    rsi_14: Some(55.0), // >= 50 on a normal day
                    sma_20: Some(180.0),
                    sma_50: Some(170.0),
                    close_price: Some(184.0),
                },
            );
            // Rebuild a pipeline with the hot RSI.
            let generator = SignalGenerator::new(
                fx.broker.clone(),
                shared(daily),
                shared(IntradayTaCache::new()),
                Arc::clone(&fx.pipeline.refdata),
                fx.pipeline.clock,
            );
            let pipeline = Arc::new(TriggerPipeline {
                generator,
                store: fx.signal_store.clone(),
                refdata: Arc::clone(&fx.pipeline.refdata),
                regime: Arc::clone(&fx.pipeline.regime),
                mgr_a: Arc::clone(&fx.pipeline.mgr_a),
                mgr_b: Arc::clone(&fx.pipeline.mgr_b),
                counters: Arc::clone(&fx.pipeline.counters),
                app: Arc::clone(&fx.pipeline.app),
                clock: fx.pipeline.clock,
            });
            pipeline.process(s2_trigger()).await;
        }

        // A rejected by the chain, B opened on the confirmation.
        assert!(fx.trade_store.open_rows(AccountId::A).is_empty());
        assert_eq!(fx.trade_store.open_rows(AccountId::B).len(), 1);

        let evals = fx.signal_store.evaluations.lock();
        assert!(!evals[0].passed_all_filters);
        assert_eq!(evals[0].rejection_reason.as_deref(), Some("rsi_high"));
    }

    #[tokio::test]
    async fn low_score_skips_both_accounts() {
        let fx = fixture();
        let mut trigger = s2_trigger();
        // Thin flow: concentration components collapse, score drops under 10.
        trigger.stats.contracts_total = 30;
        trigger.volume_ratio = 4.0;

        Arc::clone(&fx.pipeline).process(trigger).await;

        let evals = fx.signal_store.evaluations.lock();
        assert_eq!(evals[0].rejection_reason.as_deref(), Some("score<10"));
        assert!(fx.trade_store.open_rows(AccountId::A).is_empty());
        assert!(fx.trade_store.open_rows(AccountId::B).is_empty());
    }

    #[tokio::test]
    async fn engulfing_store_outage_skips_b_quietly() {
        let fx = fixture();
        *fx.signal_store.fail_engulfing.lock() = true;

        Arc::clone(&fx.pipeline).process(s2_trigger()).await;

        // A unaffected, B skipped, nothing exploded.
        assert_eq!(fx.trade_store.open_rows(AccountId::A).len(), 1);
        assert!(fx.trade_store.open_rows(AccountId::B).is_empty());
    }
}
