// =============================================================================
// Configuration — environment-driven settings plus strategy constants
// =============================================================================
//
// All tunables that vary between deployments come from environment variables
// (see .env.example); everything that defines the strategy itself is a
// constant in this module so a reviewer can see the whole contract in one
// place.
//
// Every env value is trimmed of surrounding whitespace INCLUDING carriage
// returns before use. A stray \r in DATABASE_URL corrupts the socket path on
// some platforms, so the trim is not optional.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;

// ─── Detection ───────────────────────────────────────────────────────────────

/// Rolling window length for the trade aggregator.
pub const WINDOW_SECS: i64 = 60;
/// Window notional must exceed `baseline × UOA_THRESHOLD` to trigger.
pub const UOA_THRESHOLD: f64 = 3.0;
/// Minimum window notional before a symbol is even considered.
pub const MIN_WINDOW_NOTIONAL: f64 = 10_000.0;
/// Minimum time between successive triggers on the same symbol.
pub const COOLDOWN_MINUTES: i64 = 60;
/// Detector scan cadence.
pub const SCAN_INTERVAL_SECS: u64 = 10;
/// Baseline used when a symbol has no history.
pub const BASELINE_FALLBACK_NOTIONAL: f64 = 50_000.0;
/// Trading days of history averaged into a baseline.
pub const BASELINE_LOOKBACK_DAYS: usize = 20;
/// Per-symbol window entries kept before oldest entries are dropped.
pub const WINDOW_SOFT_CAP: usize = 10_000;

/// Firehose condition codes treated as intermarket sweeps.
pub const SWEEP_CONDITION_CODES: &[i32] = &[14, 227];

// ─── Admission ───────────────────────────────────────────────────────────────

/// Minimum total score for either account.
pub const MIN_SCORE: u8 = 10;
/// Filter-chain notional floor.
pub const FILTER_MIN_NOTIONAL: f64 = 50_000.0;
/// RSI ceiling on a normal day.
pub const RSI_THRESHOLD_NORMAL: f64 = 50.0;
/// RSI ceiling on a bounce day (green open after two red closes).
pub const RSI_THRESHOLD_BOUNCE: f64 = 60.0;
/// Media mentions at or above this count mark the trade as crowded.
pub const CROWDED_MENTIONS_MAX: i64 = 5;
/// Reject when this many same-sector positions are already open or pending.
pub const SECTOR_CAP: usize = 2;
/// SPY return from today's open at or below this fails the regime gate.
pub const REGIME_MIN_OPEN_RETURN: f64 = -0.005;
/// How long a regime verdict is trusted before re-checking.
pub const REGIME_CACHE_SECS: u64 = 30;
/// Calendar-day radius of the earnings exclusion.
pub const EARNINGS_EXCLUSION_DAYS: i64 = 2;
/// Engulfing lookback for the Account B confirmation.
pub const ENGULFING_LOOKBACK_MINUTES: i64 = 30;
/// Age limit for daily-watchlist engulfing patterns.
pub const ENGULFING_WATCHLIST_HOURS: i64 = 20;

// ─── Execution ───────────────────────────────────────────────────────────────

/// Hard notional cap per position.
pub const POS_NOTIONAL_CAP: f64 = 10_000.0;
/// Fraction of account equity risked per position.
pub const POS_PCT: f64 = 0.10;
/// Mark-to-entry loss that forces a close.
pub const HARD_STOP_PCT: f64 = -0.02;
/// REST safety-net poll cadence for the hard-stop monitor.
pub const HARD_STOP_POLL_SECS: u64 = 30;
/// Spot snapshot timeout during signal enrichment.
pub const SPOT_TIMEOUT_SECS: u64 = 2;
/// Bars REST timeout during TA fallback.
pub const TA_TIMEOUT_SECS: u64 = 3;
/// Daily bars lookback for the TA fallback path.
pub const TA_BARS_LOOKBACK_DAYS: i64 = 120;
/// Intraday TA cache reload cadence.
pub const INTRADAY_TA_RELOAD_SECS: u64 = 300;

fn default_eod_exit() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 55, 0).expect("valid time")
}

// ─── Env-driven configuration ────────────────────────────────────────────────

/// Key/secret pair for one broker account.
#[derive(Clone)]
pub struct BrokerCreds {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for BrokerCreds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCreds")
            .field("key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Deployment configuration read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub polygon_key: String,
    pub alpaca_a: BrokerCreds,
    pub alpaca_b: BrokerCreds,
    pub timezone: Tz,
    pub bind_addr: String,
    pub eod_exit_time: NaiveTime,
    pub max_concurrent_a: usize,
    pub max_concurrent_b: usize,
}

impl Config {
    /// Read the full configuration from the environment. Missing required
    /// variables are a fatal startup error.
    pub fn from_env() -> Result<Self> {
        let timezone: Tz = env_or("FLOWHAWK_TZ", "America/New_York")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid FLOWHAWK_TZ: {e}"))?;

        let eod_exit_time = match std::env::var("FLOWHAWK_EOD_EXIT") {
            Ok(raw) => NaiveTime::parse_from_str(trimmed(&raw).as_str(), "%H:%M")
                .context("FLOWHAWK_EOD_EXIT must be HH:MM")?,
            Err(_) => default_eod_exit(),
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            polygon_key: required("POLYGON_API_KEY")?,
            alpaca_a: BrokerCreds {
                key: required("ALPACA_KEY_A")?,
                secret: required("ALPACA_SECRET_A")?,
            },
            alpaca_b: BrokerCreds {
                key: required("ALPACA_KEY_B")?,
                secret: required("ALPACA_SECRET_B")?,
            },
            timezone,
            bind_addr: env_or("FLOWHAWK_BIND_ADDR", "0.0.0.0:3001"),
            eod_exit_time,
            max_concurrent_a: env_usize_or("FLOWHAWK_MAX_POSITIONS_A", 5)?,
            max_concurrent_b: env_usize_or("FLOWHAWK_MAX_POSITIONS_B", 5)?,
        })
    }
}

/// Trim surrounding whitespace, carriage returns included.
fn trimmed(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '\r').to_string()
}

fn required(name: &str) -> Result<String> {
    let raw = std::env::var(name).with_context(|| format!("missing required env var {name}"))?;
    let value = trimmed(&raw);
    if value.is_empty() {
        bail!("env var {name} is empty after trimming");
    }
    Ok(value)
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .map(|v| trimmed(&v))
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_usize_or(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(raw) => trimmed(&raw)
            .parse()
            .with_context(|| format!("env var {name} must be an integer")),
        Err(_) => Ok(default),
    }
}
