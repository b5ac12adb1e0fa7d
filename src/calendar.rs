//! Slot generation and weekly-schedule projection. Pure functions, no state.

use chrono::{Datelike, Months, NaiveDate};

use crate::model::*;

/// Half-hour slots from `open` up to, not including, `close`.
/// `open >= close` yields no slots.
pub fn generate_slots(open: SlotTime, close: SlotTime) -> Vec<Slot> {
    let mut slots = Vec::new();
    let mut cur = Some(open);
    while let Some(time) = cur
        && time < close
    {
        slots.push(Slot { time, enabled: true });
        cur = time.plus_minutes(SLOT_MINUTES);
    }
    slots
}

/// Calendar day for `date` as the weekly schedule lays it out.
pub fn project_day(schedule: &WeeklySchedule, date: NaiveDate) -> CalendarDay {
    let entry = schedule.for_date(date);
    if entry.enabled {
        CalendarDay {
            date,
            slots: generate_slots(entry.open, entry.close),
            closed: false,
        }
    } else {
        CalendarDay {
            date,
            slots: Vec::new(),
            closed: true,
        }
    }
}

/// Days `from..=to` in order; empty when `from > to`.
pub fn project_range(schedule: &WeeklySchedule, from: NaiveDate, to: NaiveDate) -> Vec<CalendarDay> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .map(|d| project_day(schedule, d))
        .collect()
}

/// `today + months`, clamped to the last day of the target month.
pub fn horizon_target(today: NaiveDate, months: u32) -> NaiveDate {
    today
        .checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Last day of the year `date` falls in.
pub fn year_end(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date)
}

/// First and last day of a `YYYY-MM` month.
pub fn month_bounds(month: &str) -> Result<(NaiveDate, NaiveDate), String> {
    let bad = || format!("bad month '{month}': expected YYYY-MM");
    if month.len() != 7 || month.as_bytes()[4] != b'-' {
        return Err(bad());
    }
    let year: i32 = month[..4].parse().map_err(|_| bad())?;
    let m: u32 = month[5..].parse().map_err(|_| bad())?;
    let first = NaiveDate::from_ymd_opt(year, m, 1).ok_or_else(bad)?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .ok_or_else(bad)?;
    Ok((first, last))
}
