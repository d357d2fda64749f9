// =============================================================================
// Bucket Aggregator — builds tomorrow's baselines from today's flow
// =============================================================================
//
// Accumulates every valid trade into 30-minute wall-clock buckets keyed by
// (underlying, trade date, bucket start). When the session clock crosses a
// bucket boundary the closed buckets are drained into upsert rows for the
// persistent baseline store; the upsert key makes a double flush harmless.
//
// Invariant: drained notional + still-open notional for a (symbol, date)
// always equals the total valid notional recorded for it.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::session::SessionClock;
use crate::types::OptionTrade;

/// One flushed bucket, upserted into `intraday_baselines_30m`.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineRow {
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub bucket_start: NaiveTime,
    pub prints: i64,
    pub notional: f64,
    pub contracts_unique: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    symbol: String,
    trade_date: NaiveDate,
    bucket_start: NaiveTime,
}

#[derive(Debug, Default)]
struct BucketAccum {
    prints: i64,
    notional: f64,
    contracts: HashSet<String>,
}

/// Accumulator for the time-of-day baseline store.
pub struct BucketAggregator {
    clock: SessionClock,
    open: HashMap<BucketKey, BucketAccum>,
}

impl BucketAggregator {
    pub fn new(clock: SessionClock) -> Self {
        Self {
            clock,
            open: HashMap::new(),
        }
    }

    /// Fold one trade into its current bucket.
    pub fn record(&mut self, trade: &OptionTrade) {
        let key = BucketKey {
            symbol: trade.underlying.clone(),
            trade_date: self.clock.trade_date(trade.ts),
            bucket_start: self.clock.bucket_start(trade.ts),
        };
        let accum = self.open.entry(key).or_default();
        accum.prints += 1;
        accum.notional += trade.notional;
        accum.contracts.insert(trade.occ_symbol.clone());
    }

    /// Drain every bucket whose boundary has passed as of `now`. Cheap when
    /// nothing has closed; called from the engine's periodic tick.
    pub fn drain_closed(&mut self, now: DateTime<Utc>) -> Vec<BaselineRow> {
        let today = self.clock.trade_date(now);
        let current_start = self.clock.bucket_start(now);

        let closed: Vec<BucketKey> = self
            .open
            .keys()
            .filter(|k| k.trade_date < today || k.bucket_start < current_start)
            .cloned()
            .collect();

        closed
            .into_iter()
            .filter_map(|k| self.open.remove(&k).map(|a| to_row(k, a)))
            .collect()
    }

    /// Drain everything, closed or not (shutdown flush).
    pub fn drain_all(&mut self) -> Vec<BaselineRow> {
        self.open
            .drain()
            .map(|(k, a)| to_row(k, a))
            .collect()
    }

    /// Buckets currently accumulating.
    pub fn open_buckets(&self) -> usize {
        self.open.len()
    }
}

fn to_row(key: BucketKey, accum: BucketAccum) -> BaselineRow {
    BaselineRow {
        symbol: key.symbol,
        trade_date: key.trade_date,
        bucket_start: key.bucket_start,
        prints: accum.prints,
        notional: accum.notional,
        contracts_unique: accum.contracts.len() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptionRight;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn clock() -> SessionClock {
        SessionClock::new(New_York)
    }

    fn et(h: u32, m: u32) -> DateTime<Utc> {
        // EDT date: ET = UTC-4.
        Utc.with_ymd_and_hms(2024, 6, 18, h + 4, m, 0).unwrap()
    }

    fn trade(sym: &str, occ: &str, ts: DateTime<Utc>, notional: f64) -> OptionTrade {
        OptionTrade {
            occ_symbol: occ.to_string(),
            underlying: sym.to_string(),
            right: OptionRight::Call,
            strike: 100.0,
            expiry: NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(),
            ts,
            price: 1.0,
            size: 1,
            notional,
            is_sweep: false,
        }
    }

    #[test]
    fn accumulates_into_aligned_bucket() {
        let mut b = BucketAggregator::new(clock());
        b.record(&trade("AAPL", "AAPL240621C00100000", et(9, 31), 1000.0));
        b.record(&trade("AAPL", "AAPL240621C00100000", et(9, 45), 500.0));
        b.record(&trade("AAPL", "AAPL240621C00110000", et(9, 59), 250.0));
        assert_eq!(b.open_buckets(), 1);

        // Nothing closed while still inside 09:30–10:00.
        assert!(b.drain_closed(et(9, 59)).is_empty());

        let rows = b.drain_closed(et(10, 0));
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.symbol, "AAPL");
        assert_eq!(row.bucket_start, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(row.prints, 3);
        assert!((row.notional - 1750.0).abs() < 1e-6);
        assert_eq!(row.contracts_unique, 2);
        assert_eq!(b.open_buckets(), 0);
    }

    #[test]
    fn only_closed_buckets_drain() {
        let mut b = BucketAggregator::new(clock());
        b.record(&trade("AAPL", "A1", et(9, 40), 100.0));
        b.record(&trade("AAPL", "A2", et(10, 5), 200.0));

        let rows = b.drain_closed(et(10, 6));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bucket_start, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        // The 10:00 bucket is still accumulating.
        assert_eq!(b.open_buckets(), 1);
    }

    #[test]
    fn drain_all_flushes_open_buckets() {
        let mut b = BucketAggregator::new(clock());
        b.record(&trade("NET", "N1", et(11, 1), 300.0));
        let rows = b.drain_all();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].notional - 300.0).abs() < 1e-6);
        assert_eq!(b.open_buckets(), 0);
    }

    #[test]
    fn conservation_across_drains() {
        // Flushed + still-open notional equals everything recorded.
        let mut b = BucketAggregator::new(clock());
        b.record(&trade("NET", "N1", et(9, 40), 100.0));
        b.record(&trade("NET", "N2", et(10, 10), 250.0));
        b.record(&trade("NET", "N3", et(10, 40), 650.0));

        let mut total = 0.0;
        for row in b.drain_closed(et(10, 45)) {
            total += row.notional;
        }
        for row in b.drain_all() {
            total += row.notional;
        }
        assert!((total - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn separate_symbols_separate_buckets() {
        let mut b = BucketAggregator::new(clock());
        b.record(&trade("AAPL", "A1", et(9, 40), 100.0));
        b.record(&trade("NET", "N1", et(9, 41), 200.0));
        assert_eq!(b.open_buckets(), 2);
    }
}
