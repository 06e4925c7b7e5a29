//! Wall clock abstraction and cascade boundary detection.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::sync::Mutex;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, time: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = time;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Cascade Boundaries
// ============================================================================

/// Rollup granularities in nesting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 5] = [
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Month,
        Granularity::Year,
    ];

    fn key(self, t: &NaiveDateTime) -> (i32, u32, u32, u32, u32) {
        match self {
            Granularity::Minute => (t.year(), t.month(), t.day(), t.hour(), t.minute()),
            Granularity::Hour => (t.year(), t.month(), t.day(), t.hour(), 0),
            Granularity::Day => (t.year(), t.month(), t.day(), 0, 0),
            Granularity::Month => (t.year(), t.month(), 0, 0, 0),
            Granularity::Year => (t.year(), 0, 0, 0, 0),
        }
    }

    /// True when `a` and `b` fall in different windows of this granularity.
    pub fn crossed(self, a: &NaiveDateTime, b: &NaiveDateTime) -> bool {
        self.key(a) != self.key(b)
    }
}

/// Boundaries crossed between the last observed time and now.
///
/// The result is always a nesting-order prefix of [`Granularity::ALL`]: a level
/// is included only when every lower level is included too.
pub fn crossed_boundaries(last: &NaiveDateTime, now: &NaiveDateTime) -> Vec<Granularity> {
    Granularity::ALL
        .into_iter()
        .take_while(|g| g.crossed(last, now))
        .collect()
}

/// Start of the hour containing `t`.
pub fn hour_start(t: &NaiveDateTime) -> NaiveDateTime {
    t.date()
        .and_time(NaiveTime::from_hms_opt(t.hour(), 0, 0).unwrap_or(NaiveTime::MIN))
}

/// Midnight of `date`.
pub fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the year containing `date`.
pub fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

/// Half-open window `[start, end)` of the period that just completed, for a
/// boundary at `now`.
///
/// The hour window is stamped one hour back so the record lands on the start
/// of the completed hour.
pub fn completed_window(granularity: Granularity, now: &NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    match granularity {
        Granularity::Minute => {
            let end = now.date().and_time(
                NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(NaiveTime::MIN),
            );
            (end - Duration::minutes(1), end)
        }
        Granularity::Hour => {
            let end = hour_start(now);
            (end - Duration::hours(1), end)
        }
        Granularity::Day => {
            let end = midnight(now.date());
            (end - Duration::days(1), end)
        }
        Granularity::Month => {
            let end = month_start(now.date());
            let start = month_start(end.pred_opt().unwrap_or(end));
            (midnight(start), midnight(end))
        }
        Granularity::Year => {
            let end = year_start(now.date());
            let start = year_start(end.pred_opt().unwrap_or(end));
            (midnight(start), midnight(end))
        }
    }
}
