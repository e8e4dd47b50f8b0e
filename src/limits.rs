//! Hard caps on engine state and request sizes.

pub const MAX_CATEGORIES: usize = 1_000;
pub const MAX_ROOMS: usize = 20_000;
pub const MAX_RULES_PER_CATEGORY: usize = 2_000;
pub const MAX_OVERRIDES_PER_ROOM: usize = 256;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

/// Rooms in a single `create_booking` request.
pub const MAX_ROOMS_PER_BOOKING: usize = 64;
/// Nights in a single stay.
pub const MAX_STAY_NIGHTS: i64 = 365;
/// Days in a single price calendar (inclusive range).
pub const MAX_CALENDAR_DAYS: i64 = 731;

/// Base prices and nightly rates, in currency units.
pub const MAX_PRICE: i64 = 1_000_000_000;
/// Magnitude of an override adjustment, fixed or percentage.
pub const MAX_ADJUSTMENT: i64 = 1_000_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SEASON_NAME_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_PHONE_LEN: usize = 32;
