// =============================================================================
// Reference Data — bulk caches loaded at startup, swapped on daily refresh
// =============================================================================
//
// Sector, earnings, media sentiment, GEX, the ETF exclusion set, and the
// daily engulfing watchlist all live here as plain read-only maps. The
// engine holds `Arc<ReferenceData>`; a refresh builds a new value and swaps
// the Arc, so no reader ever observes a half-loaded cache.
//
// Lookups are infallible: an absent symbol means "unknown", and each filter
// defines its own unknown semantics (earnings unknown passes, sector unknown
// never trips the concentration cap).
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::config::EARNINGS_EXCLUSION_DAYS;

/// Broad-market and sector ETFs excluded from single-name UOA logic.
const ETF_EXCLUSIONS: &[&str] = &[
    "SPY", "QQQ", "IWM", "DIA", "VXX", "UVXY", "SVXY", "SQQQ", "TQQQ", "SPXU",
    "UPRO", "SOXL", "SOXS", "XLF", "XLE", "XLK", "XLV", "XLI", "XLP", "XLU",
    "XLY", "XLB", "XLRE", "XLC", "GLD", "SLV", "USO", "UNG", "TLT", "IEF",
    "HYG", "LQD", "EEM", "EFA", "FXI", "EWZ", "KWEB", "ARKK", "SMH", "XBI",
    "KRE", "XOP", "GDX", "GDXJ", "JETS", "XRT",
];

/// Daily media features for one symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaFeatures {
    pub mentions: i64,
    pub sentiment: f64,
}

/// Immutable reference caches for one trading day.
#[derive(Debug, Default)]
pub struct ReferenceData {
    sectors: HashMap<String, String>,
    earnings: HashMap<String, Vec<NaiveDate>>,
    media: HashMap<String, MediaFeatures>,
    gex: HashMap<String, serde_json::Value>,
    /// Symbols with a 1D bullish engulfing detected in the last 20 hours.
    engulfing_watchlist: HashSet<String>,
    etf_exclusions: HashSet<&'static str>,
}

impl ReferenceData {
    pub fn new(
        sectors: HashMap<String, String>,
        earnings: HashMap<String, Vec<NaiveDate>>,
        media: HashMap<String, MediaFeatures>,
        gex: HashMap<String, serde_json::Value>,
        engulfing_watchlist: HashSet<String>,
    ) -> Self {
        Self {
            sectors,
            earnings,
            media,
            gex,
            engulfing_watchlist,
            etf_exclusions: ETF_EXCLUSIONS.iter().copied().collect(),
        }
    }

    /// Empty caches with the ETF set still populated (degraded boot).
    pub fn minimal() -> Self {
        Self {
            etf_exclusions: ETF_EXCLUSIONS.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn is_etf(&self, symbol: &str) -> bool {
        self.etf_exclusions.contains(symbol)
    }

    pub fn sector(&self, symbol: &str) -> Option<&str> {
        self.sectors.get(symbol).map(String::as_str)
    }

    /// True when an earnings event falls within ±2 calendar days of `today`.
    pub fn earnings_near(&self, symbol: &str, today: NaiveDate) -> bool {
        self.earnings
            .get(symbol)
            .map(|dates| {
                dates.iter().any(|d| {
                    (*d - today).num_days().abs() <= EARNINGS_EXCLUSION_DAYS
                })
            })
            .unwrap_or(false)
    }

    pub fn media(&self, symbol: &str) -> Option<MediaFeatures> {
        self.media.get(symbol).copied()
    }

    pub fn gex(&self, symbol: &str) -> Option<&serde_json::Value> {
        self.gex.get(symbol)
    }

    pub fn on_engulfing_watchlist(&self, symbol: &str) -> bool {
        self.engulfing_watchlist.contains(symbol)
    }

    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.sectors.len(),
            self.earnings.len(),
            self.media.len(),
            self.gex.len(),
            self.engulfing_watchlist.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn refdata_with_earnings(symbol: &str, event: NaiveDate) -> ReferenceData {
        let mut earnings = HashMap::new();
        earnings.insert(symbol.to_string(), vec![event]);
        ReferenceData::new(
            HashMap::new(),
            earnings,
            HashMap::new(),
            HashMap::new(),
            HashSet::new(),
        )
    }

    #[test]
    fn etf_set_matches() {
        let rd = ReferenceData::minimal();
        assert!(rd.is_etf("SPY"));
        assert!(rd.is_etf("XLF"));
        assert!(!rd.is_etf("AAPL"));
    }

    #[test]
    fn earnings_radius_is_two_calendar_days() {
        let today = date(2024, 6, 18);
        let rd = refdata_with_earnings("NET", date(2024, 6, 20));
        assert!(rd.earnings_near("NET", today));

        let rd = refdata_with_earnings("NET", date(2024, 6, 21));
        assert!(!rd.earnings_near("NET", today));

        // Two days back also counts.
        let rd = refdata_with_earnings("NET", date(2024, 6, 16));
        assert!(rd.earnings_near("NET", today));
    }

    #[test]
    fn unknown_symbol_has_no_earnings() {
        let rd = ReferenceData::minimal();
        assert!(!rd.earnings_near("AAPL", date(2024, 6, 18)));
    }

    #[test]
    fn sector_and_media_lookups() {
        let mut sectors = HashMap::new();
        sectors.insert("NET".to_string(), "Technology".to_string());
        let mut media = HashMap::new();
        media.insert(
            "NET".to_string(),
            MediaFeatures {
                mentions: 2,
                sentiment: 0.1,
            },
        );
        let rd = ReferenceData::new(
            sectors,
            HashMap::new(),
            media,
            HashMap::new(),
            HashSet::new(),
        );
        assert_eq!(rd.sector("NET"), Some("Technology"));
        assert_eq!(rd.sector("AAPL"), None);
        assert_eq!(rd.media("NET").unwrap().mentions, 2);
        assert!(rd.media("AAPL").is_none());
    }

    #[test]
    fn watchlist_membership() {
        let mut wl = HashSet::new();
        wl.insert("NVDA".to_string());
        let rd = ReferenceData::new(
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            wl,
        );
        assert!(rd.on_engulfing_watchlist("NVDA"));
        assert!(!rd.on_engulfing_watchlist("AMD"));
    }
}
