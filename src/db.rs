// =============================================================================
// Persistence — sqlx Postgres layer
// =============================================================================
//
// One pool, acquired per operation. Tables this engine writes are created on
// boot with IF NOT EXISTS; tables written by the nightly jobs are only
// checked for existence and missing ones fail the boot (schema drift is a
// fatal startup error, never a runtime one).
//
// Write semantics the rest of the engine relies on:
//   - evaluations are append-only
//   - active_signals upserts on (detected_at, symbol)
//   - the paper trade logs keep at most one open row per symbol via a
//     partial unique index, and closes update strictly by id so a position
//     held across days still closes
//   - baseline bucket flushes upsert on the composite key (idempotent)
//
// The `TradeStore` trait is the seam the position manager writes through;
// tests substitute an in-memory store.
// =============================================================================

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{info, warn};

use crate::baseline::BaselineHistoryRow;
use crate::buckets::BaselineRow;
use crate::refdata::MediaFeatures;
use crate::signals::Evaluation;
use crate::ta::{DailyTaCache, DailyTaRow, IntradayTaCache, IntradayTaRow};
use crate::types::AccountId;

/// Tables owned by the nightly/daily jobs; their absence at boot is fatal.
const REQUIRED_EXTERNAL_TABLES: &[&str] = &[
    "ta_daily_close",
    "ta_intraday_5m",
    "earnings_calendar",
    "media_daily_features",
    "master_tickers",
    "gex_snapshot",
    "engulfing_scores",
];

// ---------------------------------------------------------------------------
// Trade store seam
// ---------------------------------------------------------------------------

/// Fields written when a position opens.
#[derive(Debug, Clone)]
pub struct TradeOpen {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub shares: i64,
    pub score_total: i32,
    pub rsi_14: Option<f64>,
    pub signal_notional: f64,
    pub volume_ratio: f64,
    pub detected_at: DateTime<Utc>,
}

/// Fields written when a position closes.
#[derive(Debug, Clone)]
pub struct TradeClose {
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: String,
}

/// One open row read back during startup reconciliation.
#[derive(Debug, Clone)]
pub struct OpenTradeRow {
    pub db_id: i64,
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub shares: i64,
    pub score_total: i32,
    pub rsi_14: Option<f64>,
    pub signal_notional: f64,
    pub detected_at: Option<DateTime<Utc>>,
}

/// Persistence surface for the per-account position managers.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Insert the open row, returning its id.
    async fn log_trade_open(&self, account: AccountId, open: &TradeOpen) -> Result<i64>;

    /// Close by id. Must succeed regardless of how many days have passed
    /// since the open.
    async fn log_trade_close(
        &self,
        account: AccountId,
        db_id: i64,
        close: &TradeClose,
    ) -> Result<()>;

    /// All rows with `exit_time IS NULL`.
    async fn load_open_trades(&self, account: AccountId) -> Result<Vec<OpenTradeRow>>;

    /// Flip the matching active_signals row to CLOSED. Missing rows are not
    /// an error.
    async fn mark_signal_closed(&self, symbol: &str, detected_at: DateTime<Utc>) -> Result<()>;
}

/// Persistence surface for the signal pipeline (evaluations, passed
/// signals, tracked symbols, the Account B engulfing lookup).
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert_evaluation(&self, eval: &Evaluation) -> Result<()>;
    async fn upsert_active_signal(&self, eval: &Evaluation) -> Result<()>;
    async fn upsert_tracked_symbol(&self, symbol: &str, ts: DateTime<Utc>) -> Result<()>;
    async fn recent_bullish_engulfing(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        info!("database pool connected");
        Ok(Self { pool })
    }

    /// Create owned tables, verify external ones. Fatal on drift.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in OWNED_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("schema bootstrap failed: {statement}"))?;
        }

        for table in REQUIRED_EXTERNAL_TABLES {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT to_regclass($1)::text")
                    .bind(table)
                    .fetch_one(&self.pool)
                    .await
                    .with_context(|| format!("failed to check table {table}"))?;
            if exists.is_none() {
                anyhow::bail!("required table {table} is missing — schema mismatch");
            }
        }

        info!("schema verified");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Signal pipeline writes
    // -------------------------------------------------------------------------

    /// Append-only evaluation row, written for every signal pass or fail.
    pub async fn insert_evaluation(&self, eval: &Evaluation) -> Result<()> {
        let s = &eval.signal;
        sqlx::query(
            r#"
            INSERT INTO signal_evaluations (
                detected_at, symbol, score_total, score_components,
                volume_ratio, baseline_notional, window_notional,
                window_prints, window_contracts, call_pct, sweep_pct,
                unique_strikes, rsi_14, sma_20, sma_50, last_close,
                spot_price, trend, passed_all_filters, rejection_reason,
                metadata
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21
            )
            "#,
        )
        .bind(s.detected_at)
        .bind(&s.symbol)
        .bind(s.score_total() as i32)
        .bind(serde_json::to_value(s.score).unwrap_or(serde_json::Value::Null))
        .bind(s.volume_ratio)
        .bind(s.baseline_notional)
        .bind(s.stats.notional_total)
        .bind(s.stats.prints as i64)
        .bind(s.stats.contracts_total as i64)
        .bind(s.stats.call_pct)
        .bind(s.stats.sweep_pct)
        .bind(s.stats.unique_strikes as i32)
        .bind(s.ta.rsi_14)
        .bind(s.ta.sma_20)
        .bind(s.ta.sma_50)
        .bind(s.ta.last_close)
        .bind((s.spot_price > 0.0).then_some(s.spot_price))
        .bind(s.trend)
        .bind(eval.passed_all_filters)
        .bind(eval.rejection_reason.as_deref())
        .bind(&s.metadata)
        .execute(&self.pool)
        .await
        .context("failed to insert signal evaluation")?;
        Ok(())
    }

    /// Upsert the passed-signal projection; replays of the same key are
    /// harmless.
    pub async fn upsert_active_signal(&self, eval: &Evaluation) -> Result<()> {
        let s = &eval.signal;
        sqlx::query(
            r#"
            INSERT INTO active_signals (detected_at, symbol, score_total, spot_price, status)
            VALUES ($1, $2, $3, $4, 'ACTIVE')
            ON CONFLICT (detected_at, symbol) DO NOTHING
            "#,
        )
        .bind(s.detected_at)
        .bind(&s.symbol)
        .bind(s.score_total() as i32)
        .bind((s.spot_price > 0.0).then_some(s.spot_price))
        .execute(&self.pool)
        .await
        .context("failed to upsert active signal")?;
        Ok(())
    }

    /// Bump the tracked-symbols row; every trigger lands here.
    pub async fn upsert_tracked_symbol(
        &self,
        symbol: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracked_symbols (symbol, trigger_count, last_trigger_ts)
            VALUES ($1, 1, $2)
            ON CONFLICT (symbol) DO UPDATE
            SET trigger_count = tracked_symbols.trigger_count + 1,
                last_trigger_ts = EXCLUDED.last_trigger_ts
            "#,
        )
        .bind(symbol)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("failed to upsert tracked symbol")?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Baseline buckets
    // -------------------------------------------------------------------------

    /// Upsert flushed bucket rows. Retrying a flush rewrites identical data.
    pub async fn upsert_baseline_rows(&self, rows: &[BaselineRow]) -> Result<()> {
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO intraday_baselines_30m
                    (symbol, trade_date, bucket_start, prints, notional, contracts_unique)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (symbol, trade_date, bucket_start) DO UPDATE
                SET prints = EXCLUDED.prints,
                    notional = EXCLUDED.notional,
                    contracts_unique = EXCLUDED.contracts_unique
                "#,
            )
            .bind(&row.symbol)
            .bind(row.trade_date)
            .bind(row.bucket_start)
            .bind(row.prints)
            .bind(row.notional)
            .bind(row.contracts_unique)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to upsert baseline bucket for {}", row.symbol))?;
        }
        Ok(())
    }

    /// History feeding the baseline provider at startup.
    pub async fn load_baseline_history(
        &self,
        lookback_days: i64,
    ) -> Result<Vec<BaselineHistoryRow>> {
        let cutoff = Utc::now().date_naive() - Duration::days(lookback_days);
        let rows = sqlx::query(
            r#"
            SELECT symbol, trade_date, notional
            FROM intraday_baselines_30m
            WHERE trade_date >= $1 AND trade_date < $2
            "#,
        )
        .bind(cutoff)
        .bind(Utc::now().date_naive())
        .fetch_all(&self.pool)
        .await
        .context("failed to load baseline history")?;

        Ok(rows
            .into_iter()
            .map(|r| BaselineHistoryRow {
                symbol: r.get("symbol"),
                trade_date: r.get("trade_date"),
                notional: r.get("notional"),
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Reference loaders (boot + daily refresh)
    // -------------------------------------------------------------------------

    pub async fn load_daily_ta(&self) -> Result<DailyTaCache> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (symbol)
                symbol, rsi_14, sma_20, sma_50, close_price
            FROM ta_daily_close
            ORDER BY symbol, trade_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load daily TA cache")?;

        let mut cache = DailyTaCache::new();
        for r in rows {
            cache.insert(
                r.get("symbol"),
                DailyTaRow {
                    rsi_14: r.get("rsi_14"),
                    sma_20: r.get("sma_20"),
                    sma_50: r.get("sma_50"),
                    close_price: r.get("close_price"),
                },
            );
        }
        Ok(cache)
    }

    pub async fn load_intraday_ta(&self) -> Result<IntradayTaCache> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (symbol)
                symbol, rsi_14, sma_20, price, snapshot_ts
            FROM ta_intraday_5m
            WHERE snapshot_ts > $1
            ORDER BY symbol, snapshot_ts DESC
            "#,
        )
        .bind(Utc::now() - Duration::hours(1))
        .fetch_all(&self.pool)
        .await
        .context("failed to load intraday TA cache")?;

        let mut cache = IntradayTaCache::new();
        for r in rows {
            cache.insert(
                r.get("symbol"),
                IntradayTaRow {
                    rsi_14: r.get("rsi_14"),
                    sma_20: r.get("sma_20"),
                    price: r.get("price"),
                    snapshot_ts: r.get("snapshot_ts"),
                },
            );
        }
        Ok(cache)
    }

    pub async fn load_sectors(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT symbol, sector FROM master_tickers WHERE sector IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load sectors")?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("symbol"), r.get("sector")))
            .collect())
    }

    /// Earnings events within a ±7 day window; the filter narrows to ±2.
    pub async fn load_earnings(&self) -> Result<HashMap<String, Vec<NaiveDate>>> {
        let today = Utc::now().date_naive();
        let rows = sqlx::query(
            r#"
            SELECT symbol, event_date
            FROM earnings_calendar
            WHERE event_date BETWEEN $1 AND $2
            "#,
        )
        .bind(today - Duration::days(7))
        .bind(today + Duration::days(7))
        .fetch_all(&self.pool)
        .await
        .context("failed to load earnings calendar")?;

        let mut out: HashMap<String, Vec<NaiveDate>> = HashMap::new();
        for r in rows {
            out.entry(r.get("symbol")).or_default().push(r.get("event_date"));
        }
        Ok(out)
    }

    pub async fn load_media(&self) -> Result<HashMap<String, MediaFeatures>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (symbol) symbol, mentions, sentiment
            FROM media_daily_features
            ORDER BY symbol, asof_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load media features")?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<String, _>("symbol"),
                    MediaFeatures {
                        mentions: r.get("mentions"),
                        sentiment: r.get("sentiment"),
                    },
                )
            })
            .collect())
    }

    pub async fn load_gex(&self) -> Result<HashMap<String, serde_json::Value>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (symbol) symbol, net_gex, gamma_flip, snapshot_ts
            FROM gex_snapshot
            ORDER BY symbol, snapshot_ts DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load GEX snapshots")?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let symbol: String = r.get("symbol");
                let value = serde_json::json!({
                    "net_gex": r.get::<Option<f64>, _>("net_gex"),
                    "gamma_flip": r.get::<Option<f64>, _>("gamma_flip"),
                    "snapshot_ts": r.get::<DateTime<Utc>, _>("snapshot_ts").to_rfc3339(),
                });
                (symbol, value)
            })
            .collect())
    }

    /// Symbols with a 1D bullish engulfing in the last 20 hours.
    pub async fn load_engulfing_watchlist(&self, cutoff: DateTime<Utc>) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT symbol
            FROM engulfing_scores
            WHERE timeframe = '1D' AND direction = 'bullish' AND scan_ts > $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("failed to load engulfing watchlist")?;

        Ok(rows.into_iter().map(|r| r.get("symbol")).collect())
    }

    /// Most recent 5-minute bullish engulfing for a symbol after `cutoff`,
    /// returning its pattern strength.
    pub async fn recent_bullish_engulfing(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT pattern_strength
            FROM engulfing_scores
            WHERE symbol = $1
              AND timeframe = '5min'
              AND direction = 'bullish'
              AND scan_ts > $2
            ORDER BY scan_ts DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query engulfing scores")?;

        Ok(row.and_then(|r| r.get("pattern_strength")))
    }
}

#[async_trait]
impl SignalStore for Db {
    async fn insert_evaluation(&self, eval: &Evaluation) -> Result<()> {
        Db::insert_evaluation(self, eval).await
    }

    async fn upsert_active_signal(&self, eval: &Evaluation) -> Result<()> {
        Db::upsert_active_signal(self, eval).await
    }

    async fn upsert_tracked_symbol(&self, symbol: &str, ts: DateTime<Utc>) -> Result<()> {
        Db::upsert_tracked_symbol(self, symbol, ts).await
    }

    async fn recent_bullish_engulfing(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<String>> {
        Db::recent_bullish_engulfing(self, symbol, cutoff).await
    }
}

#[async_trait]
impl TradeStore for Db {
    async fn log_trade_open(&self, account: AccountId, open: &TradeOpen) -> Result<i64> {
        // The table name comes from a fixed enum, never from input.
        let query = format!(
            r#"
            INSERT INTO {} (
                symbol, entry_time, entry_price, shares, score_total,
                rsi_14, signal_notional, volume_ratio, detected_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
            account.trade_log_table()
        );

        let id: i64 = sqlx::query_scalar(&query)
            .bind(&open.symbol)
            .bind(open.entry_time)
            .bind(open.entry_price)
            .bind(open.shares)
            .bind(open.score_total)
            .bind(open.rsi_14)
            .bind(open.signal_notional)
            .bind(open.volume_ratio)
            .bind(open.detected_at)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to log trade open for {}", open.symbol))?;

        Ok(id)
    }

    async fn log_trade_close(
        &self,
        account: AccountId,
        db_id: i64,
        close: &TradeClose,
    ) -> Result<()> {
        // Close strictly by id: no date predicate, so a position opened days
        // ago still closes.
        let query = format!(
            r#"
            UPDATE {}
            SET exit_time = $1, exit_price = $2, pnl = $3, pnl_pct = $4,
                exit_reason = $5
            WHERE id = $6
            "#,
            account.trade_log_table()
        );

        let result = sqlx::query(&query)
            .bind(close.exit_time)
            .bind(close.exit_price)
            .bind(close.pnl)
            .bind(close.pnl_pct)
            .bind(&close.exit_reason)
            .bind(db_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to log trade close for id {db_id}"))?;

        if result.rows_affected() == 0 {
            warn!(db_id, account = %account, "trade close matched no row");
        }
        Ok(())
    }

    async fn load_open_trades(&self, account: AccountId) -> Result<Vec<OpenTradeRow>> {
        let query = format!(
            r#"
            SELECT id, symbol, entry_time, entry_price, shares, score_total,
                   rsi_14, signal_notional, detected_at
            FROM {}
            WHERE exit_time IS NULL
            ORDER BY entry_time
            "#,
            account.trade_log_table()
        );

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("failed to load open trades")?;

        Ok(rows
            .into_iter()
            .map(|r| OpenTradeRow {
                db_id: r.get("id"),
                symbol: r.get("symbol"),
                entry_time: r.get("entry_time"),
                entry_price: r.get("entry_price"),
                shares: r.get("shares"),
                score_total: r.get::<Option<i32>, _>("score_total").unwrap_or(0),
                rsi_14: r.get("rsi_14"),
                signal_notional: r.get::<Option<f64>, _>("signal_notional").unwrap_or(0.0),
                detected_at: r.get("detected_at"),
            })
            .collect())
    }

    async fn mark_signal_closed(&self, symbol: &str, detected_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE active_signals SET status = 'CLOSED'
            WHERE symbol = $1 AND detected_at = $2
            "#,
        )
        .bind(symbol)
        .bind(detected_at)
        .execute(&self.pool)
        .await
        .context("failed to mark signal closed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Owned schema
// ---------------------------------------------------------------------------

const OWNED_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS signal_evaluations (
        id BIGSERIAL PRIMARY KEY,
        detected_at TIMESTAMPTZ NOT NULL,
        symbol TEXT NOT NULL,
        score_total INT NOT NULL,
        score_components JSONB NOT NULL,
        volume_ratio DOUBLE PRECISION NOT NULL,
        baseline_notional DOUBLE PRECISION NOT NULL,
        window_notional DOUBLE PRECISION NOT NULL,
        window_prints BIGINT NOT NULL,
        window_contracts BIGINT NOT NULL,
        call_pct DOUBLE PRECISION NOT NULL,
        sweep_pct DOUBLE PRECISION NOT NULL,
        unique_strikes INT NOT NULL,
        rsi_14 DOUBLE PRECISION,
        sma_20 DOUBLE PRECISION,
        sma_50 DOUBLE PRECISION,
        last_close DOUBLE PRECISION,
        spot_price DOUBLE PRECISION,
        trend TEXT,
        passed_all_filters BOOLEAN NOT NULL,
        rejection_reason TEXT,
        metadata JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS active_signals (
        id BIGSERIAL PRIMARY KEY,
        detected_at TIMESTAMPTZ NOT NULL,
        symbol TEXT NOT NULL,
        score_total INT NOT NULL,
        spot_price DOUBLE PRECISION,
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        UNIQUE (detected_at, symbol)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS paper_trades_log (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        entry_time TIMESTAMPTZ NOT NULL,
        entry_price DOUBLE PRECISION NOT NULL,
        shares BIGINT NOT NULL,
        score_total INT,
        rsi_14 DOUBLE PRECISION,
        signal_notional DOUBLE PRECISION,
        volume_ratio DOUBLE PRECISION,
        detected_at TIMESTAMPTZ,
        exit_time TIMESTAMPTZ,
        exit_price DOUBLE PRECISION,
        pnl DOUBLE PRECISION,
        pnl_pct DOUBLE PRECISION,
        exit_reason TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS paper_trades_log_open_symbol
    ON paper_trades_log (symbol) WHERE exit_time IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS paper_trades_log_b (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        entry_time TIMESTAMPTZ NOT NULL,
        entry_price DOUBLE PRECISION NOT NULL,
        shares BIGINT NOT NULL,
        score_total INT,
        rsi_14 DOUBLE PRECISION,
        signal_notional DOUBLE PRECISION,
        volume_ratio DOUBLE PRECISION,
        detected_at TIMESTAMPTZ,
        exit_time TIMESTAMPTZ,
        exit_price DOUBLE PRECISION,
        pnl DOUBLE PRECISION,
        pnl_pct DOUBLE PRECISION,
        exit_reason TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS paper_trades_log_b_open_symbol
    ON paper_trades_log_b (symbol) WHERE exit_time IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_symbols (
        symbol TEXT PRIMARY KEY,
        trigger_count BIGINT NOT NULL DEFAULT 0,
        last_trigger_ts TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS intraday_baselines_30m (
        symbol TEXT NOT NULL,
        trade_date DATE NOT NULL,
        bucket_start TIME NOT NULL,
        prints BIGINT NOT NULL,
        notional DOUBLE PRECISION NOT NULL,
        contracts_unique BIGINT NOT NULL,
        PRIMARY KEY (symbol, trade_date, bucket_start)
    )
    "#,
];

// ---------------------------------------------------------------------------
// In-memory trade store for tests
// ---------------------------------------------------------------------------
