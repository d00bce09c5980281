/// Rows kept per owner before further inserts are refused.
pub const MAX_OVERRIDES_PER_OWNER: usize = 10_000;

/// Ranges accepted by one `block_date_ranges` / `set_special_pricing` call.
pub const MAX_BATCH_RANGES: usize = 500;

/// Longest single override range, in days.
pub const MAX_OVERRIDE_DAYS: i64 = 3 * 366;

/// Longest stay priced or checked in one call, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Upper bound for `initialize_default_availability`.
pub const MAX_DAYS_AHEAD: u32 = 3 * 366;

/// Calendar years accepted anywhere a date is supplied.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

pub const MAX_SCOPE_ID_LEN: usize = 256;
