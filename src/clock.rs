use chrono::{Local, NaiveDate, Utc};

use crate::model::Ms;

/// Source of "today" and wall-clock millis.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
    fn now_ms(&self) -> Ms;
}

/// Facility-local date, UTC millis.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
pub use fixed::FixedClock;
