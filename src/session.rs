// =============================================================================
// Session Clock — exchange-local time arithmetic
// =============================================================================
//
// Every wall-clock decision in the engine (bucket alignment, EOD window,
// daily rollover, the 09:35 TA-source cutover) is made in exchange time,
// normally America/New_York. This module is the single place that converts
// UTC instants into session-local dates and times.
// =============================================================================

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Minutes per baseline bucket.
pub const BUCKET_MINUTES: u32 = 30;

/// Intraday TA is preferred only after this session time.
pub fn intraday_ta_cutover() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 35, 0).expect("valid time")
}

/// Converts UTC instants into exchange-local session coordinates.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    tz: Tz,
}

impl SessionClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        self.tz.from_utc_datetime(&now.naive_utc())
    }

    /// The session trade date for an instant.
    pub fn trade_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    /// Session-local time of day.
    pub fn session_time(&self, now: DateTime<Utc>) -> NaiveTime {
        self.local(now).time()
    }

    /// Start of the 30-minute bucket containing `now` (09:30, 10:00, ...).
    pub fn bucket_start(&self, now: DateTime<Utc>) -> NaiveTime {
        let t = self.session_time(now);
        let floored = t.minute() - (t.minute() % BUCKET_MINUTES);
        NaiveTime::from_hms_opt(t.hour(), floored, 0).expect("valid time")
    }

    /// True once the session clock has reached `exit_time`. Deliberately has
    /// no upper bound so a late-started process still liquidates.
    pub fn past_eod(&self, now: DateTime<Utc>, exit_time: NaiveTime) -> bool {
        self.session_time(now) >= exit_time
    }

    /// True before the intraday-TA cutover (daily-close cache is used).
    pub fn before_intraday_cutover(&self, now: DateTime<Utc>) -> bool {
        self.session_time(now) < intraday_ta_cutover()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn clock() -> SessionClock {
        SessionClock::new(New_York)
    }

    fn et(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        // 2024-06-18 is an EDT date: ET = UTC-4.
        Utc.with_ymd_and_hms(2024, 6, 18, h + 4, m, s).unwrap()
    }

    #[test]
    fn bucket_floors_to_half_hour() {
        assert_eq!(
            clock().bucket_start(et(9, 30, 0)),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            clock().bucket_start(et(9, 59, 59)),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            clock().bucket_start(et(10, 0, 0)),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
        assert_eq!(
            clock().bucket_start(et(15, 47, 12)),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap()
        );
    }

    #[test]
    fn eod_boundary() {
        let exit = NaiveTime::from_hms_opt(15, 55, 0).unwrap();
        assert!(!clock().past_eod(et(15, 54, 59), exit));
        assert!(clock().past_eod(et(15, 55, 0), exit));
        // Late start: well past the window still closes.
        assert!(clock().past_eod(et(16, 30, 0), exit));
    }

    #[test]
    fn intraday_cutover() {
        assert!(clock().before_intraday_cutover(et(9, 34, 59)));
        assert!(!clock().before_intraday_cutover(et(9, 35, 0)));
    }

    #[test]
    fn trade_date_uses_session_timezone() {
        // 01:00 UTC is the previous evening in New York.
        let now = Utc.with_ymd_and_hms(2024, 6, 19, 1, 0, 0).unwrap();
        assert_eq!(
            clock().trade_date(now),
            NaiveDate::from_ymd_opt(2024, 6, 18).unwrap()
        );
    }
}
