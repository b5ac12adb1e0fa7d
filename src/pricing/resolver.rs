use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{weekday_index, BookingDuration, SlotTime};

use super::rules::{round_amount, PricePair, PricingMode, PricingRuleSet};

/// Which rule produced a price. Listed highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceLevel {
    DateOverride,
    PeriodOverride,
    WeekdayBand,
    GenericBand,
    Base,
    Flat,
    /// Per-person price for an exact party size; not part of the cascade.
    Party,
}

impl PriceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceLevel::DateOverride => "date_override",
            PriceLevel::PeriodOverride => "period_override",
            PriceLevel::WeekdayBand => "weekday_band",
            PriceLevel::GenericBand => "generic_band",
            PriceLevel::Base => "base",
            PriceLevel::Flat => "flat",
            PriceLevel::Party => "party",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub total: Decimal,
    /// Per-person share when a party size was given.
    pub per_person: Option<Decimal>,
    pub level: PriceLevel,
}

/// Walk the cascade and return the first matching level with its prices.
/// `None` prices only happen for a flat set without a flat pair.
pub fn cascade(
    rules: &PricingRuleSet,
    date: NaiveDate,
    start: SlotTime,
) -> (PriceLevel, Option<&PricePair>) {
    if let Some(o) = rules.date_overrides.iter().find(|o| o.date == date) {
        return (PriceLevel::DateOverride, Some(&o.prices));
    }
    if let Some(p) = rules.period_overrides.iter().find(|p| p.contains(date)) {
        return (PriceLevel::PeriodOverride, Some(&p.prices));
    }
    let weekday = weekday_index(date);
    if let Some(band) = rules
        .time_bands
        .iter()
        .find(|b| !b.is_generic() && b.days_of_week.contains(&weekday) && b.contains(start))
    {
        return (PriceLevel::WeekdayBand, Some(&band.prices));
    }
    if let Some(band) = rules
        .time_bands
        .iter()
        .find(|b| b.is_generic() && b.contains(start))
    {
        return (PriceLevel::GenericBand, Some(&band.prices));
    }
    if rules.mode == PricingMode::Advanced
        && let Some(base) = &rules.base
    {
        return (PriceLevel::Base, Some(base));
    }
    (PriceLevel::Flat, rules.flat.as_ref())
}

/// Price one booking. Pure and total for any rule set that passed validation.
pub fn resolve_price(
    rules: &PricingRuleSet,
    date: NaiveDate,
    start: SlotTime,
    duration: BookingDuration,
    party_size: Option<u32>,
) -> Quote {
    if let Some(players) = party_size
        && let Some(party) = rules.party.as_ref().filter(|p| p.enabled)
        && let Some(entry) = party.prices.iter().find(|p| p.players == players)
    {
        let per_person = entry.per_person.amount_for(duration);
        return Quote {
            total: round_amount(per_person * Decimal::from(players)),
            per_person: Some(per_person),
            level: PriceLevel::Party,
        };
    }

    let (level, prices) = cascade(rules, date, start);
    let total = prices.map_or(Decimal::ZERO, |p| p.amount_for(duration));
    let per_person = party_size
        .filter(|n| *n > 0)
        .map(|n| round_amount(total / Decimal::from(n)));
    Quote {
        total,
        per_person,
        level,
    }
}
