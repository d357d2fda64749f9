// =============================================================================
// Market Regime — benchmark gate and the bounce-day flag
// =============================================================================
//
// Two benchmark-derived inputs to admission:
//
//   - The regime gate: SPY's intraday return from today's open. At or below
//     -0.5% the market is selling off and new longs are refused. The verdict
//     is cached for 30 s, and every failure mode (network error, missing or
//     zero open price) fails OPEN — a broken data feed must not silently
//     halt the strategy.
//
//   - The bounce-day flag: today opened above yesterday's close after two
//     consecutive lower closes. Evaluated once per daily reset from daily
//     bars plus the snapshot open; filters read the cached bool.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::config::{REGIME_CACHE_SECS, REGIME_MIN_OPEN_RETURN};

/// Benchmark underlying for both checks.
pub const BENCHMARK: &str = "SPY";

pub struct MarketRegime {
    broker: Arc<dyn Broker>,
    cached: Mutex<Option<(Instant, bool)>>,
    bounce_day: AtomicBool,
}

impl MarketRegime {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            cached: Mutex::new(None),
            bounce_day: AtomicBool::new(false),
        }
    }

    /// True when new entries are allowed. Cached for `REGIME_CACHE_SECS`.
    pub async fn regime_ok(&self) -> bool {
        if let Some((at, verdict)) = *self.cached.lock() {
            if at.elapsed().as_secs() < REGIME_CACHE_SECS {
                return verdict;
            }
        }

        let verdict = self.check_benchmark().await;
        *self.cached.lock() = Some((Instant::now(), verdict));
        verdict
    }

    async fn check_benchmark(&self) -> bool {
        match self.broker.snapshot(BENCHMARK).await {
            Ok(snap) => {
                let Some(open) = snap.day_open.filter(|o| *o > 0.0) else {
                    // Stale or zero open: fail open.
                    debug!("benchmark snapshot missing day open, regime check skipped");
                    return true;
                };
                if snap.price <= 0.0 {
                    return true;
                }
                let open_return = snap.price / open - 1.0;
                let ok = open_return > REGIME_MIN_OPEN_RETURN;
                if !ok {
                    info!(
                        open_return = format!("{:.4}", open_return),
                        "weak market regime, entries gated"
                    );
                }
                ok
            }
            Err(e) => {
                // Network failure fails open.
                warn!(error = %e, "regime check failed, allowing entries");
                true
            }
        }
    }

    /// Whether today is a bounce day (relaxes the RSI ceiling to 60).
    pub fn is_bounce_day(&self) -> bool {
        self.bounce_day.load(Ordering::Relaxed)
    }

    /// Re-evaluate the bounce flag at the daily reset: green open after two
    /// consecutive red closes on the benchmark.
    pub async fn refresh_bounce_day(&self) {
        let flag = self.compute_bounce_day().await;
        self.bounce_day.store(flag, Ordering::Relaxed);
        self.cached.lock().take();
        info!(bounce_day = flag, "bounce-day flag refreshed");
    }

    async fn compute_bounce_day(&self) -> bool {
        let closes = match self
            .broker
            .daily_bars(&[BENCHMARK.to_string()], 10)
            .await
        {
            Ok(mut bars) => bars
                .remove(BENCHMARK)
                .unwrap_or_default()
                .iter()
                .map(|b| b.close)
                .collect::<Vec<f64>>(),
            Err(e) => {
                warn!(error = %e, "bounce-day bars fetch failed");
                return false;
            }
        };

        // Need yesterday plus the two closes before it.
        if closes.len() < 3 {
            return false;
        }
        let yesterday = closes[closes.len() - 1];
        let two_ago = closes[closes.len() - 2];
        let three_ago = closes[closes.len() - 3];
        let two_reds = yesterday < two_ago && two_ago < three_ago;
        if !two_reds {
            return false;
        }

        match self.broker.snapshot(BENCHMARK).await {
            Ok(snap) => match snap.day_open {
                Some(open) if open > 0.0 => open > yesterday,
                _ => false,
            },
            Err(e) => {
                warn!(error = %e, "bounce-day snapshot fetch failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketRegime")
            .field("bounce_day", &self.is_bounce_day())
            .finish()
    }
}
