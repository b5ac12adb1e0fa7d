use crate::limits::*;

use super::rules::{PricePair, PricingMode, PricingRuleSet, TimeBand};

/// Check a rule set for internal consistency. Every check runs; an empty
/// list means the set may be saved.
pub fn validate(rules: &PricingRuleSet) -> Vec<String> {
    let mut errors = Vec::new();

    check_required_pairs(rules, &mut errors);
    check_limits(rules, &mut errors);
    check_entries(rules, &mut errors);
    check_date_overrides(rules, &mut errors);
    check_period_overrides(rules, &mut errors);
    check_generic_bands(rules, &mut errors);
    check_weekday_bands(rules, &mut errors);

    errors
}

fn check_required_pairs(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    match &rules.flat {
        None if rules.mode == PricingMode::Flat => {
            errors.push("flat mode requires flat prices".into());
        }
        Some(pair) if pair.negatives() => errors.push("flat prices must not be negative".into()),
        _ => {}
    }
    match &rules.base {
        None if rules.mode == PricingMode::Advanced => {
            errors.push("advanced mode requires base prices".into());
        }
        Some(pair) if pair.negatives() => errors.push("base prices must not be negative".into()),
        _ => {}
    }
}

fn check_limits(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    if rules.time_bands.len() > MAX_PRICING_ENTRIES
        || rules.date_overrides.len() > MAX_PRICING_ENTRIES
        || rules.period_overrides.len() > MAX_PRICING_ENTRIES
    {
        errors.push(format!("at most {MAX_PRICING_ENTRIES} entries per rule list"));
    }
}

fn check_pair(pair: &PricePair, what: &str, errors: &mut Vec<String>) {
    if pair.negatives() {
        errors.push(format!("{what}: prices must not be negative"));
    }
}

fn check_entries(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    for (i, band) in rules.time_bands.iter().enumerate() {
        let what = format!("time band {i} ({}-{})", band.start, band.end);
        check_pair(&band.prices, &what, errors);
        if band.start >= band.end {
            errors.push(format!("{what}: start must be before end"));
        }
        if let Some(day) = band.days_of_week.iter().find(|d| **d > 6) {
            errors.push(format!("{what}: bad weekday {day} (expected 0-6)"));
        }
    }
    for o in &rules.date_overrides {
        check_pair(&o.prices, &format!("date override {}", o.date), errors);
    }
    for p in &rules.period_overrides {
        let what = format!("period override {}..{}", p.start_date, p.end_date);
        check_pair(&p.prices, &what, errors);
        if p.start_date > p.end_date {
            errors.push(format!("{what}: start date must not be after end date"));
        }
    }
    if let Some(party) = &rules.party {
        for (i, entry) in party.prices.iter().enumerate() {
            let what = format!("party price {i} ({} players)", entry.players);
            check_pair(&entry.per_person, &what, errors);
            if entry.players == 0 || entry.players > MAX_PARTY_SIZE {
                errors.push(format!("{what}: players must be 1-{MAX_PARTY_SIZE}"));
            }
        }
        for (i, a) in party.prices.iter().enumerate() {
            if party.prices[..i].iter().any(|b| b.players == a.players) {
                errors.push(format!("duplicate party price for {} players", a.players));
            }
        }
    }
}

fn check_date_overrides(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    for (i, a) in rules.date_overrides.iter().enumerate() {
        if rules.date_overrides[..i].iter().any(|b| b.date == a.date) {
            errors.push(format!("duplicate date override for {}", a.date));
        }
    }
}

fn check_period_overrides(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    let periods = &rules.period_overrides;
    for i in 0..periods.len() {
        for j in (i + 1)..periods.len() {
            let (a, b) = (&periods[i], &periods[j]);
            if a.start_date <= b.end_date && b.start_date <= a.end_date {
                errors.push(format!(
                    "period overrides {}..{} and {}..{} overlap",
                    a.start_date, a.end_date, b.start_date, b.end_date
                ));
            }
        }
    }
}

fn bands_overlap(a: &TimeBand, b: &TimeBand) -> bool {
    a.start < b.end && b.start < a.end
}

fn band_overlap_error(a: &TimeBand, b: &TimeBand, scope: &str) -> String {
    format!(
        "time bands {}-{} and {}-{} overlap{scope}",
        a.start, a.end, b.start, b.end
    )
}

fn check_generic_bands(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    let generic: Vec<&TimeBand> = rules.time_bands.iter().filter(|b| b.is_generic()).collect();
    for i in 0..generic.len() {
        for j in (i + 1)..generic.len() {
            if bands_overlap(generic[i], generic[j]) {
                errors.push(band_overlap_error(generic[i], generic[j], ""));
            }
        }
    }
}

/// Bands sharing a weekday must not overlap in time. Each conflicting pair is
/// reported once, on the first weekday they share.
fn check_weekday_bands(rules: &PricingRuleSet, errors: &mut Vec<String>) {
    let scoped: Vec<&TimeBand> = rules.time_bands.iter().filter(|b| !b.is_generic()).collect();
    for i in 0..scoped.len() {
        for j in (i + 1)..scoped.len() {
            let (a, b) = (scoped[i], scoped[j]);
            let shared = (0u8..7).find(|d| a.days_of_week.contains(d) && b.days_of_week.contains(d));
            if let Some(day) = shared
                && bands_overlap(a, b)
            {
                errors.push(band_overlap_error(a, b, &format!(" on weekday {day}")));
            }
        }
    }
}
