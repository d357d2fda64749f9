// =============================================================================
// Engine State — counters, rejection ring, and the status snapshot
// =============================================================================
//
// The status API and the structured log are the only consumers here; nothing
// in the trading path reads these counters. Atomics for lock-free counting,
// a capped ring buffer for recent rejections, and a version counter bumped
// on every meaningful mutation.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::firehose::FirehoseCounters;
use crate::positions::{DailyStats, Position, PositionManager};
use crate::regime::MarketRegime;

/// Maximum number of recent rejections retained.
const MAX_RECENT_REJECTIONS: usize = 100;

/// One rejected signal, kept for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionRecord {
    pub symbol: String,
    pub reason: String,
    pub score_total: u8,
    pub at: String,
}

/// Pipeline counters bumped by the engine and trigger pipeline.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub triggers: AtomicU64,
    pub evaluations: AtomicU64,
    pub passes: AtomicU64,
    pub opens: AtomicU64,
    pub db_write_errors: AtomicU64,
}

/// Shared state behind the status API.
pub struct AppState {
    pub state_version: AtomicU64,
    pub firehose: Arc<FirehoseCounters>,
    pub pipeline: Arc<PipelineCounters>,
    pub managers: Vec<Arc<PositionManager>>,
    pub regime: Arc<MarketRegime>,
    recent_rejections: RwLock<Vec<RejectionRecord>>,
    start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        firehose: Arc<FirehoseCounters>,
        pipeline: Arc<PipelineCounters>,
        managers: Vec<Arc<PositionManager>>,
        regime: Arc<MarketRegime>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            firehose,
            pipeline,
            managers,
            regime,
            recent_rejections: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a rejection; the ring is capped at [`MAX_RECENT_REJECTIONS`].
    pub fn push_rejection(&self, symbol: &str, reason: &str, score_total: u8) {
        let mut rejections = self.recent_rejections.write();
        rejections.push(RejectionRecord {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
            score_total,
            at: Utc::now().to_rfc3339(),
        });
        while rejections.len() > MAX_RECENT_REJECTIONS {
            rejections.remove(0);
        }
        drop(rejections);
        self.increment_version();
    }

    /// Build the full snapshot served by `GET /api/v1/state`.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let accounts = self
            .managers
            .iter()
            .map(|m| AccountSnapshot {
                account: m.account().to_string(),
                open_positions: m.open_positions(),
                daily: m.daily_stats(),
                eod_done: m.eod_done(),
                persistence_errors: m.persistence_errors(),
            })
            .collect();

        StateSnapshot {
            state_version: self.state_version.load(Ordering::SeqCst),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            bounce_day: self.regime.is_bounce_day(),
            firehose: FirehoseSnapshot {
                trades_received: self.firehose.trades_received.load(Ordering::Relaxed),
                trades_malformed: self.firehose.trades_malformed.load(Ordering::Relaxed),
                trades_dropped: self.firehose.trades_dropped.load(Ordering::Relaxed),
                reconnects: self.firehose.reconnects.load(Ordering::Relaxed),
            },
            pipeline: PipelineSnapshot {
                triggers: self.pipeline.triggers.load(Ordering::Relaxed),
                evaluations: self.pipeline.evaluations.load(Ordering::Relaxed),
                passes: self.pipeline.passes.load(Ordering::Relaxed),
                opens: self.pipeline.opens.load(Ordering::Relaxed),
                db_write_errors: self.pipeline.db_write_errors.load(Ordering::Relaxed),
            },
            accounts,
            recent_rejections: self.recent_rejections.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub bounce_day: bool,
    pub firehose: FirehoseSnapshot,
    pub pipeline: PipelineSnapshot,
    pub accounts: Vec<AccountSnapshot>,
    pub recent_rejections: Vec<RejectionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirehoseSnapshot {
    pub trades_received: u64,
    pub trades_malformed: u64,
    pub trades_dropped: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub triggers: u64,
    pub evaluations: u64,
    pub passes: u64,
    pub opens: u64,
    pub db_write_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub account: String,
    pub open_positions: Vec<Position>,
    pub daily: DailyStats,
    pub eod_done: bool,
    pub persistence_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBroker;

    fn app_state() -> AppState {
        AppState::new(
            Arc::new(FirehoseCounters::default()),
            Arc::new(PipelineCounters::default()),
            Vec::new(),
            Arc::new(MarketRegime::new(Arc::new(MockBroker::new()))),
        )
    }

    #[test]
    fn rejection_ring_is_capped() {
        let state = app_state();
        for i in 0..150 {
            state.push_rejection(&format!("SYM{i}"), "score<10", 4);
        }
        let snapshot = state.build_snapshot();
        assert_eq!(snapshot.recent_rejections.len(), MAX_RECENT_REJECTIONS);
        // Oldest entries were evicted.
        assert_eq!(snapshot.recent_rejections[0].symbol, "SYM50");
    }

    #[test]
    fn version_increments_on_rejection() {
        let state = app_state();
        let before = state.state_version.load(Ordering::SeqCst);
        state.push_rejection("NET", "etf_excluded", 0);
        assert!(state.state_version.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn snapshot_serializes() {
        let state = app_state();
        state.pipeline.triggers.fetch_add(3, Ordering::Relaxed);
        let json = serde_json::to_value(state.build_snapshot()).unwrap();
        assert_eq!(json["pipeline"]["triggers"], 3);
        assert!(json["accounts"].as_array().unwrap().is_empty());
    }
}
