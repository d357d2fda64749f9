// =============================================================================
// Flowhawk — Main Entry Point
// =============================================================================
//
// Unusual-options-activity detector + dual-account paper executor. Startup
// is fail-fast: missing environment, an unreachable database, or schema
// drift exits non-zero before any stream connects. Everything after boot
// degrades instead of dying.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod api;
mod app_state;
mod baseline;
mod broker;
mod buckets;
mod config;
mod db;
mod engine;
mod engulfing;
mod filters;
mod firehose;
mod hard_stop;
mod occ;
mod positions;
mod refdata;
mod regime;
mod scorer;
mod session;
mod signals;
mod ta;
mod types;
mod uoa_detector;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, PipelineCounters};
use crate::baseline::BaselineProvider;
use crate::broker::AlpacaClient;
use crate::config::Config;
use crate::db::Db;
use crate::engine::{Engine, TriggerPipeline};
use crate::firehose::FirehoseCounters;
use crate::positions::{AccountLimits, PositionManager};
use crate::refdata::ReferenceData;
use crate::regime::MarketRegime;
use crate::session::SessionClock;
use crate::signals::{shared, SignalGenerator};
use crate::types::AccountId;

/// Calendar days of bucket history loaded to cover 20 trading days.
const BASELINE_HISTORY_CALENDAR_DAYS: i64 = 45;
/// Engine trade channel depth; overflow is dropped and counted upstream.
const TRADE_CHANNEL_DEPTH: usize = 65_536;
/// Grace period for the engine's shutdown flush.
const SHUTDOWN_GRACE_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Flowhawk — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = Config::from_env()?;
    let clock = SessionClock::new(config.timezone);
    info!(
        timezone = %config.timezone,
        eod_exit = %config.eod_exit_time,
        "session clock configured"
    );

    // ── 2. Database (fatal on failure) ───────────────────────────────────
    let db = Arc::new(Db::connect(&config.database_url).await?);
    db.ensure_schema().await?;

    // ── 3. Brokers ───────────────────────────────────────────────────────
    let broker_a: Arc<dyn broker::Broker> = Arc::new(AlpacaClient::new(&config.alpaca_a));
    let broker_b: Arc<dyn broker::Broker> = Arc::new(AlpacaClient::new(&config.alpaca_b));

    // ── 4. Caches & baselines ────────────────────────────────────────────
    let history = db
        .load_baseline_history(BASELINE_HISTORY_CALENDAR_DAYS)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "baseline history load failed, all symbols on fallback");
            Vec::new()
        });
    let baselines = BaselineProvider::from_rows(&history);
    info!(symbols = baselines.known_symbols(), "baselines loaded");

    let daily_ta = shared(db.load_daily_ta().await.unwrap_or_else(|e| {
        warn!(error = %e, "daily TA load failed");
        Default::default()
    }));
    let intraday_ta = shared(db.load_intraday_ta().await.unwrap_or_else(|e| {
        warn!(error = %e, "intraday TA load failed");
        Default::default()
    }));
    let refdata = shared(match engine::load_reference_data(&db).await {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "reference data load failed, starting with ETF set only");
            ReferenceData::minimal()
        }
    });

    // ── 5. Regime + bounce day ───────────────────────────────────────────
    let regime = Arc::new(MarketRegime::new(Arc::clone(&broker_a)));
    regime.refresh_bounce_day().await;

    // ── 6. Position managers + startup reconcile ─────────────────────────
    let mgr_a = Arc::new(PositionManager::new(
        AccountId::A,
        Arc::clone(&broker_a),
        db.clone(),
        AccountLimits {
            max_concurrent: config.max_concurrent_a,
            ..AccountLimits::default()
        },
    ));
    let mgr_b = Arc::new(PositionManager::new(
        AccountId::B,
        Arc::clone(&broker_b),
        db.clone(),
        AccountLimits {
            max_concurrent: config.max_concurrent_b,
            ..AccountLimits::default()
        },
    ));

    for manager in [&mgr_a, &mgr_b] {
        if let Err(e) = manager.sync_on_startup().await {
            // A broker outage at boot is transient; the safety-net poll
            // keeps watching once it recovers.
            error!(account = %manager.account(), error = %e, "startup reconcile failed");
        }
    }

    // ── 7. Shared state + pipeline ───────────────────────────────────────
    let firehose_counters = Arc::new(FirehoseCounters::default());
    let pipeline_counters = Arc::new(PipelineCounters::default());
    let app = Arc::new(AppState::new(
        Arc::clone(&firehose_counters),
        Arc::clone(&pipeline_counters),
        vec![Arc::clone(&mgr_a), Arc::clone(&mgr_b)],
        Arc::clone(&regime),
    ));

    let generator = SignalGenerator::new(
        Arc::clone(&broker_a),
        Arc::clone(&daily_ta),
        Arc::clone(&intraday_ta),
        Arc::clone(&refdata),
        clock,
    );

    let pipeline = Arc::new(TriggerPipeline {
        generator,
        store: db.clone(),
        refdata: Arc::clone(&refdata),
        regime: Arc::clone(&regime),
        mgr_a: Arc::clone(&mgr_a),
        mgr_b: Arc::clone(&mgr_b),
        counters: Arc::clone(&pipeline_counters),
        app: Arc::clone(&app),
        clock,
    });

    // ── 8. Channels + shutdown token ─────────────────────────────────────
    let (trade_tx, trade_rx) = mpsc::channel(TRADE_CHANNEL_DEPTH);
    let (equity_tx, equity_rx) = mpsc::channel(4_096);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 9. Stream + monitor tasks ────────────────────────────────────────
    tokio::spawn(firehose::run_firehose(
        config.polygon_key.clone(),
        trade_tx,
        Arc::clone(&firehose_counters),
        shutdown_rx.clone(),
    ));

    let watch_set = Arc::new(RwLock::new(HashSet::new()));
    tokio::spawn(broker::stream::run_equity_stream(
        config.alpaca_a.clone(),
        Arc::clone(&watch_set),
        equity_tx,
        shutdown_rx.clone(),
    ));
    tokio::spawn(hard_stop::run_hard_stop_monitor(
        vec![Arc::clone(&mgr_a), Arc::clone(&mgr_b)],
        watch_set,
        equity_rx,
        shutdown_rx.clone(),
    ));

    // Intraday TA reload loop (5-minute cadence).
    {
        let db = db.clone();
        let intraday_ta = Arc::clone(&intraday_ta);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut reload = tokio::time::interval(std::time::Duration::from_secs(
                config::INTRADAY_TA_RELOAD_SECS,
            ));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = reload.tick() => {
                        match db.load_intraday_ta().await {
                            Ok(fresh) => *intraday_ta.write() = Arc::new(fresh),
                            Err(e) => warn!(error = %e, "intraday TA reload failed"),
                        }
                    }
                }
            }
        });
    }

    // ── 10. Status API ───────────────────────────────────────────────────
    {
        let app = Arc::clone(&app);
        let bind_addr = config.bind_addr.clone();
        tokio::spawn(async move {
            let router = api::rest::router(app);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "status API listening");
                    if let Err(e) = axum::serve(listener, router).await {
                        error!(error = %e, "status API failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "status API bind failed"),
            }
        });
    }

    // ── 11. Engine ───────────────────────────────────────────────────────
    let engine = Engine::new(
        clock,
        config.eod_exit_time,
        baselines,
        db.clone(),
        pipeline,
        vec![Arc::clone(&mgr_a), Arc::clone(&mgr_b)],
    );
    let engine_task = tokio::spawn(engine.run(trade_rx, shutdown_rx));

    info!("all subsystems running");

    // ── 12. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    let _ = shutdown_tx.send(true);

    // The engine flushes buckets on its way out; give it a bounded grace
    // period, then exit regardless. Open positions are left for the next
    // boot's reconcile — unexpected shutdown never liquidates.
    match tokio::time::timeout(
        std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS),
        engine_task,
    )
    .await
    {
        Ok(_) => info!("engine stopped cleanly"),
        Err(_) => warn!("engine did not stop within grace period"),
    }

    info!("Flowhawk shut down complete.");
    Ok(())
}
