//! Deterministic pricing: rule set model, cascade resolver, validator and
//! the per-resource rule cache.

mod cache;
mod resolver;
mod rules;
mod validator;

pub use cache::PricingCache;
pub use resolver::{cascade, resolve_price, PriceLevel, Quote};
pub use rules::{
    round_amount, DateOverride, PartyPrice, PartyPricing, PeriodOverride, PricePair, PricingMode,
    PricingRuleSet, TimeBand,
};
pub use validator::validate;
