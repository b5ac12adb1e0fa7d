use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REQUESTER_LEN: usize = 128;
/// Upper bound for the rolling calendar horizon.
pub const MAX_HORIZON_MONTHS: u32 = 24;
pub const MAX_PARTY_SIZE: u32 = 64;
/// Per list (time bands, date overrides, period overrides).
pub const MAX_PRICING_ENTRIES: usize = 512;
pub const MAX_JSON_LEN: usize = 256 * 1024;
pub const DEFAULT_HORIZON_MONTHS: u32 = 3;
pub const DEFAULT_PRICING_TTL_MS: Ms = 300_000;
