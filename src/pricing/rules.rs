use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::model::{BookingDuration, SlotTime};

pub const DECIMAL_PLACES: u32 = 2;

/// Round to cents, half-up.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingMode {
    Flat,
    Advanced,
}

/// Amounts for the two bookable durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePair {
    pub one_hour: Decimal,
    #[serde(default)]
    pub one_hour_half: Option<Decimal>,
}

impl PricePair {
    pub fn new(one_hour: Decimal, one_hour_half: Decimal) -> Self {
        Self {
            one_hour,
            one_hour_half: Some(one_hour_half),
        }
    }

    pub fn hourly(one_hour: Decimal) -> Self {
        Self {
            one_hour,
            one_hour_half: None,
        }
    }

    /// Amount for `duration`. A missing 1.5h amount is the 1h amount scaled by 1.5.
    pub fn amount_for(&self, duration: BookingDuration) -> Decimal {
        match duration {
            BookingDuration::OneHour => round_amount(self.one_hour),
            BookingDuration::OneAndHalfHours => round_amount(
                self.one_hour_half
                    .unwrap_or_else(|| self.one_hour * BookingDuration::OneAndHalfHours.hours()),
            ),
        }
    }

    pub(crate) fn negatives(&self) -> bool {
        self.one_hour.is_sign_negative()
            || self.one_hour_half.is_some_and(|v| v.is_sign_negative())
    }
}

/// Price for a half-open `[start, end)` range of start times, optionally
/// restricted to weekdays (0 = Sunday .. 6 = Saturday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBand {
    pub start: SlotTime,
    pub end: SlotTime,
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub prices: PricePair,
}

impl TimeBand {
    pub fn contains(&self, time: SlotTime) -> bool {
        self.start <= time && time < self.end
    }

    pub fn is_generic(&self) -> bool {
        self.days_of_week.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateOverride {
    pub date: NaiveDate,
    pub prices: PricePair,
}

/// Inclusive `[start_date, end_date]` override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodOverride {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub prices: PricePair,
}

impl PeriodOverride {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyPrice {
    pub players: u32,
    pub per_person: PricePair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyPricing {
    pub enabled: bool,
    #[serde(default)]
    pub prices: Vec<PartyPrice>,
}

/// Layered pricing configuration owned by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRuleSet {
    pub mode: PricingMode,
    #[serde(default)]
    pub flat: Option<PricePair>,
    /// Only consulted in advanced mode.
    #[serde(default)]
    pub base: Option<PricePair>,
    #[serde(default)]
    pub time_bands: Vec<TimeBand>,
    #[serde(default)]
    pub date_overrides: Vec<DateOverride>,
    #[serde(default)]
    pub period_overrides: Vec<PeriodOverride>,
    #[serde(default)]
    pub party: Option<PartyPricing>,
}

impl PricingRuleSet {
    pub fn flat(one_hour: Decimal, one_hour_half: Decimal) -> Self {
        Self {
            mode: PricingMode::Flat,
            flat: Some(PricePair::new(one_hour, one_hour_half)),
            base: None,
            time_bands: Vec::new(),
            date_overrides: Vec::new(),
            period_overrides: Vec::new(),
            party: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("bad pricing rules: {e}"))
    }
}
