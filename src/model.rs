use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::pricing::{PriceLevel, PricingRuleSet};

/// Unix milliseconds.
pub type Ms = i64;

/// Width of every bookable slot.
pub const SLOT_MINUTES: u16 = 30;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Time of day on a 24-hour clock, rendered as zero-padded `HH:MM`.
///
/// Stored as minutes since midnight so ordering is chronological. `24:00` is
/// accepted as a closing time; no slot ever carries that label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime(u16);

impl SlotTime {
    pub const MIDNIGHT: SlotTime = SlotTime(0);
    pub const END_OF_DAY: SlotTime = SlotTime(MINUTES_PER_DAY);

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        let total = hour.checked_mul(60)?.checked_add(minute)?;
        (total <= MINUTES_PER_DAY).then_some(Self(total))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// `self + minutes`, or `None` past the end of the day.
    pub fn plus_minutes(self, minutes: u16) -> Option<Self> {
        let total = self.0.checked_add(minutes)?;
        (total <= MINUTES_PER_DAY).then_some(Self(total))
    }

    /// Label of the following half-hour slot.
    pub fn next_slot(self) -> Option<Self> {
        self.plus_minutes(SLOT_MINUTES).filter(|t| *t < Self::END_OF_DAY)
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for SlotTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(format!("bad time '{s}': expected HH:MM"));
        }
        let hour: u16 = s[..2].parse().map_err(|_| format!("bad hour in '{s}'"))?;
        let minute: u16 = s[3..].parse().map_err(|_| format!("bad minute in '{s}'"))?;
        SlotTime::from_hm(hour, minute).ok_or_else(|| format!("time out of range: '{s}'"))
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 0 = Sunday .. 6 = Saturday, always derived from the date itself.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    if s.len() != 10 {
        return Err(format!("bad date '{s}': expected YYYY-MM-DD"));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("bad date '{s}': {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub time: SlotTime,
    pub enabled: bool,
}

/// Slot availability for one resource on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
    pub closed: bool,
}

impl CalendarDay {
    pub fn slot(&self, time: SlotTime) -> Option<&Slot> {
        self.slots
            .binary_search_by_key(&time, |s| s.time)
            .ok()
            .map(|i| &self.slots[i])
    }

    pub fn slot_mut(&mut self, time: SlotTime) -> Option<&mut Slot> {
        self.slots
            .binary_search_by_key(&time, |s| s.time)
            .ok()
            .map(|i| &mut self.slots[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub enabled: bool,
    pub open: SlotTime,
    pub close: SlotTime,
}

impl DaySchedule {
    pub fn closed() -> Self {
        Self {
            enabled: false,
            open: SlotTime::MIDNIGHT,
            close: SlotTime::MIDNIGHT,
        }
    }
}

/// Opening hours for each weekday, indexed Sunday-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub days: [DaySchedule; 7],
}

impl WeeklySchedule {
    pub fn uniform(open: SlotTime, close: SlotTime) -> Self {
        Self {
            days: [DaySchedule { enabled: true, open, close }; 7],
        }
    }

    pub fn for_date(&self, date: NaiveDate) -> &DaySchedule {
        &self.days[weekday_index(date) as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingDuration {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1.5h")]
    OneAndHalfHours,
}

impl BookingDuration {
    pub fn minutes(self) -> u16 {
        match self {
            BookingDuration::OneHour => 60,
            BookingDuration::OneAndHalfHours => 90,
        }
    }

    pub fn hours(self) -> Decimal {
        match self {
            BookingDuration::OneHour => Decimal::ONE,
            BookingDuration::OneAndHalfHours => Decimal::new(15, 1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingDuration::OneHour => "1h",
            BookingDuration::OneAndHalfHours => "1.5h",
        }
    }
}

impl fmt::Display for BookingDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(BookingDuration::OneHour),
            "1.5h" => Ok(BookingDuration::OneAndHalfHours),
            other => Err(format!("bad duration '{other}': expected 1h or 1.5h")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start: SlotTime,
    pub end: SlotTime,
    pub duration: BookingDuration,
    /// Fixed at creation; later rule edits never touch it.
    pub price: Decimal,
    pub per_person: Option<Decimal>,
    pub party_size: Option<u32>,
    pub pricing_level: PriceLevel,
    pub requester: String,
    pub status: BookingStatus,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    /// Slot labels held by this booking, derived from the stored start/end:
    /// the start slot, plus the following one when the booking runs 90 minutes.
    pub fn slot_times(&self) -> Vec<SlotTime> {
        let span = self.end.minutes().saturating_sub(self.start.minutes());
        let mut times = vec![self.start];
        if span >= BookingDuration::OneAndHalfHours.minutes()
            && let Some(next) = self.start.next_slot()
        {
            times.push(next);
        }
        times
    }

    pub fn occupies(&self, time: SlotTime) -> bool {
        self.slot_times().contains(&time)
    }
}

/// Everything the store knows about one bookable resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: Ulid,
    pub owner: String,
    pub name: Option<String>,
    pub sport: Option<String>,
    pub active: bool,
    pub schedule: WeeklySchedule,
    pub pricing: PricingRuleSet,
    /// Keyed by date: at most one calendar day per (resource, date).
    pub days: BTreeMap<NaiveDate, CalendarDay>,
    pub bookings: HashMap<Ulid, Booking>,
    /// Days closed by the owner, protected from schedule re-projection.
    pub owner_closed: BTreeSet<NaiveDate>,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        owner: String,
        name: Option<String>,
        sport: Option<String>,
        schedule: WeeklySchedule,
        pricing: PricingRuleSet,
    ) -> Self {
        Self {
            id,
            owner,
            name,
            sport,
            active: true,
            schedule,
            pricing,
            days: BTreeMap::new(),
            bookings: HashMap::new(),
            owner_closed: BTreeSet::new(),
        }
    }

    /// The horizon: latest date with a calendar day.
    pub fn latest_day(&self) -> Option<NaiveDate> {
        self.days.keys().next_back().copied()
    }

    pub fn confirmed_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings
            .values()
            .filter(move |b| b.date == date && b.is_confirmed())
    }

    /// Confirmed booking holding `time` on `date`, if any.
    pub fn occupant(&self, date: NaiveDate, time: SlotTime) -> Option<&Booking> {
        self.confirmed_on(date).find(|b| b.occupies(time))
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            owner: self.owner.clone(),
            name: self.name.clone(),
            sport: self.sport.clone(),
            active: self.active,
            horizon: self.latest_day(),
        }
    }

    /// Re-enable the slots of a just-cancelled booking, but only where the day
    /// is still open and no other confirmed booking holds the slot.
    fn restore_slots(&mut self, booking: &Booking, skip: Option<SlotTime>) {
        for time in booking.slot_times() {
            if Some(time) == skip || self.occupant(booking.date, time).is_some() {
                continue;
            }
            if let Some(day) = self.days.get_mut(&booking.date)
                && !day.closed
                && let Some(slot) = day.slot_mut(time)
            {
                slot.enabled = true;
            }
        }
    }

    fn set_booking_slots(&mut self, booking: &Booking, enabled: bool) {
        if let Some(day) = self.days.get_mut(&booking.date) {
            for time in booking.slot_times() {
                if let Some(slot) = day.slot_mut(time) {
                    slot.enabled = enabled;
                }
            }
        }
    }

    /// Apply a per-resource event. Resource creation and snapshots are handled
    /// by the engine at the map level.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ResourceDeactivated { .. } => {
                self.active = false;
            }
            Event::ScheduleUpdated { weekday, entry, days, .. } => {
                self.schedule.days[*weekday as usize] = *entry;
                for day in days {
                    self.days.insert(day.date, day.clone());
                }
            }
            Event::PricingUpdated { pricing, .. } => {
                self.pricing = pricing.clone();
            }
            Event::DaysProjected { days, .. } => {
                for day in days {
                    self.days.insert(day.date, day.clone());
                }
            }
            Event::BookingConfirmed { booking } => {
                self.set_booking_slots(booking, false);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingCancelled { id, .. } => {
                let Some(booking) = self.bookings.get_mut(id) else {
                    return;
                };
                booking.status = BookingStatus::Cancelled;
                let booking = booking.clone();
                self.restore_slots(&booking, None);
            }
            Event::DayClosed { date, .. } => {
                for booking in self.bookings.values_mut() {
                    if booking.date == *date && booking.is_confirmed() {
                        booking.status = BookingStatus::Cancelled;
                    }
                }
                if let Some(day) = self.days.get_mut(date) {
                    day.closed = true;
                    day.slots.clear();
                }
                self.owner_closed.insert(*date);
            }
            Event::DayReopened { day, .. } => {
                self.owner_closed.remove(&day.date);
                self.days.insert(day.date, day.clone());
            }
            Event::SlotToggled { date, time, enabled, .. } => {
                if !*enabled {
                    let displaced: Vec<Booking> = self
                        .confirmed_on(*date)
                        .filter(|b| b.occupies(*time))
                        .cloned()
                        .collect();
                    for booking in &displaced {
                        if let Some(b) = self.bookings.get_mut(&booking.id) {
                            b.status = BookingStatus::Cancelled;
                        }
                    }
                    for booking in &displaced {
                        self.restore_slots(booking, Some(*time));
                    }
                }
                if let Some(slot) = self.days.get_mut(date).and_then(|d| d.slot_mut(*time)) {
                    slot.enabled = *enabled;
                }
            }
            Event::ResourceCreated { .. } | Event::ResourceSnapshot { .. } => {}
        }
    }
}

/// WAL record format. Each variant is applied deterministically on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        owner: String,
        name: Option<String>,
        sport: Option<String>,
        schedule: WeeklySchedule,
        pricing: PricingRuleSet,
    },
    ResourceDeactivated {
        id: Ulid,
    },
    ScheduleUpdated {
        resource_id: Ulid,
        weekday: u8,
        entry: DaySchedule,
        /// Re-projected days, computed when the edit was accepted.
        days: Vec<CalendarDay>,
    },
    PricingUpdated {
        resource_id: Ulid,
        pricing: PricingRuleSet,
    },
    DaysProjected {
        resource_id: Ulid,
        days: Vec<CalendarDay>,
    },
    BookingConfirmed {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
    DayClosed {
        resource_id: Ulid,
        date: NaiveDate,
    },
    DayReopened {
        resource_id: Ulid,
        day: CalendarDay,
    },
    SlotToggled {
        resource_id: Ulid,
        date: NaiveDate,
        time: SlotTime,
        enabled: bool,
    },
    /// Full state of one resource, written by WAL compaction.
    ResourceSnapshot {
        state: Box<ResourceState>,
    },
}

impl Event {
    /// Resource an event belongs to.
    pub fn resource_id(&self) -> Ulid {
        match self {
            Event::ResourceCreated { id, .. } | Event::ResourceDeactivated { id } => *id,
            Event::ScheduleUpdated { resource_id, .. }
            | Event::PricingUpdated { resource_id, .. }
            | Event::DaysProjected { resource_id, .. }
            | Event::BookingCancelled { resource_id, .. }
            | Event::DayClosed { resource_id, .. }
            | Event::DayReopened { resource_id, .. }
            | Event::SlotToggled { resource_id, .. } => *resource_id,
            Event::BookingConfirmed { booking } => booking.resource_id,
            Event::ResourceSnapshot { state } => state.id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub owner: String,
    pub name: Option<String>,
    pub sport: Option<String>,
    pub active: bool,
    pub horizon: Option<NaiveDate>,
}
