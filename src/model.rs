use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Half-open overlap test on date intervals: `[a_start, a_end)` and
/// `[b_start, b_end)` intersect iff each starts before the other ends.
///
/// Rate-rule validation and booking conflict detection both go through
/// this function.
pub fn overlaps(a_start: NaiveDate, a_end: NaiveDate, b_start: NaiveDate, b_end: NaiveDate) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open day interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// `None` for empty or inverted ranges.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Every night in the span, `start` included, `end` excluded.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayType {
    Weekday,
    Weekend,
    /// Only ever set on hand-authored rules; never derived from a date.
    Holiday,
    All,
}

impl DayType {
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }

    /// Rule scopes intersect when equal or when either side is `All`.
    pub fn intersects(self, other: DayType) -> bool {
        self == other || self == DayType::All || other == DayType::All
    }

    /// Whether a rule scoped to `self` applies on a day of type `day`.
    pub fn matches(self, day: DayType) -> bool {
        self == day || self == DayType::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentType {
    Fixed,
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Cleaning,
    Maintenance,
    Reserved,
    OutOfOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Canceled,
}

impl BookingStatus {
    /// Canceled and checked-out bookings no longer occupy the room.
    pub fn holds_room(self) -> bool {
        !matches!(self, BookingStatus::Canceled | BookingStatus::CheckedOut)
    }

    /// Room and dates may only change before check-in.
    pub fn is_changeable(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::CheckedIn => "CheckedIn",
            BookingStatus::CheckedOut => "CheckedOut",
            BookingStatus::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

// ── Records ──────────────────────────────────────────────────────

/// A seasonal nightly price for every room of a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    pub id: Ulid,
    pub category_id: Ulid,
    pub season_name: String,
    pub price_per_night: Decimal,
    pub span: DateSpan,
    pub day_type: DayType,
    pub is_active: bool,
    /// Lower wins.
    pub priority: i32,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Per-room adjustment layered on top of the resolved rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub id: Ulid,
    pub room_id: Ulid,
    pub adjustment: Decimal,
    pub adjustment_type: AdjustmentType,
    pub reason: Option<String>,
    pub is_active: bool,
    /// Inclusive; open-ended when `None`.
    pub effective_from: Option<NaiveDate>,
    /// Inclusive; open-ended when `None`.
    pub effective_to: Option<NaiveDate>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl PriceOverride {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.effective_from.is_none_or(|from| from <= date)
            && self.effective_to.is_none_or(|to| date <= to)
    }

    /// Active and not yet expired as of `today`.
    pub fn is_current(&self, today: NaiveDate) -> bool {
        self.is_active && self.effective_to.is_none_or(|to| to >= today)
    }

    /// `None` when the adjusted price does not fit in a `Decimal`.
    pub fn apply(&self, price: Decimal) -> Option<Decimal> {
        match self.adjustment_type {
            AdjustmentType::Fixed => price.checked_add(self.adjustment),
            AdjustmentType::Percentage => {
                let factor = self
                    .adjustment
                    .checked_div(Decimal::ONE_HUNDRED)?
                    .checked_add(Decimal::ONE)?;
                price.checked_mul(factor)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub customer_id: Ulid,
    /// `[check-in, check-out)`.
    pub span: DateSpan,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub id_card: Option<String>,
}

/// One entry of a room's append-only status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub old_status: Option<RoomStatus>,
    pub new_status: RoomStatus,
    pub changed_by: String,
    pub reason: Option<String>,
    pub changed_at: Ms,
}

// ── Scope state ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CategoryState {
    pub id: Ulid,
    pub name: String,
    pub base_price: Decimal,
    pub max_capacity: u32,
    /// Sorted by `span.start`.
    pub rules: Vec<RateRule>,
}

impl CategoryState {
    pub fn new(id: Ulid, name: String, base_price: Decimal, max_capacity: u32) -> Self {
        Self {
            id,
            name,
            base_price,
            max_capacity,
            rules: Vec::new(),
        }
    }

    pub fn rule(&self, id: Ulid) -> Option<&RateRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Insert or replace, keeping start order.
    pub fn upsert_rule(&mut self, rule: RateRule) {
        self.remove_rule(rule.id);
        let pos = self
            .rules
            .partition_point(|r| r.span.start <= rule.span.start);
        self.rules.insert(pos, rule);
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<RateRule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }

    /// Rules whose validity starts on or before `date`; the rest cannot contain it.
    pub fn rules_starting_by(&self, date: NaiveDate) -> &[RateRule] {
        let bound = self.rules.partition_point(|r| r.span.start <= date);
        &self.rules[..bound]
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub number: String,
    pub category_id: Ulid,
    pub floor_id: Option<Ulid>,
    pub capacity: u32,
    pub status: RoomStatus,
    pub history: Vec<StatusChange>,
    pub overrides: Vec<PriceOverride>,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        number: String,
        category_id: Ulid,
        floor_id: Option<Ulid>,
        capacity: u32,
    ) -> Self {
        Self {
            id,
            number,
            category_id,
            floor_id,
            capacity,
            status: RoomStatus::Available,
            history: Vec::new(),
            overrides: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn upsert_booking(&mut self, booking: Booking) {
        self.remove_booking(booking.id);
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn upsert_override(&mut self, ov: PriceOverride) {
        match self.overrides.iter_mut().find(|o| o.id == ov.id) {
            Some(slot) => *slot = ov,
            None => self.overrides.push(ov),
        }
    }

    pub fn remove_override(&mut self, id: Ulid) -> Option<PriceOverride> {
        let pos = self.overrides.iter().position(|o| o.id == id)?;
        Some(self.overrides.remove(pos))
    }

    /// Bookings (any status) whose stay overlaps `query`.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn overlapping<'a>(&'a self, query: &'a DateSpan) -> impl Iterator<Item = &'a Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.overlaps(query))
    }

    /// Bookings that still occupy the room.
    pub fn open_bookings(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.holds_room()).count()
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Every committed mutation. This is the journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryCreated {
        id: Ulid,
        name: String,
        base_price: Decimal,
        max_capacity: u32,
    },
    CategoryUpdated {
        id: Ulid,
        name: String,
        base_price: Decimal,
        max_capacity: u32,
    },
    CategoryDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        number: String,
        category_id: Ulid,
        floor_id: Option<Ulid>,
        capacity: u32,
        created: StatusChange,
    },
    RoomStatusChanged {
        room_id: Ulid,
        change: StatusChange,
    },
    RoomDeleted {
        id: Ulid,
    },
    RuleAdded {
        rule: RateRule,
    },
    RuleUpdated {
        rule: RateRule,
    },
    RuleRemoved {
        id: Ulid,
        category_id: Ulid,
    },
    OverrideAdded {
        ov: PriceOverride,
    },
    OverrideUpdated {
        ov: PriceOverride,
    },
    OverrideRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    CustomerCreated {
        customer: Customer,
    },
    BookingCreated {
        booking: Booking,
    },
    /// Room and/or dates changed; `previous_room_id` differs from
    /// `booking.room_id` when the stay moved rooms.
    BookingUpdated {
        booking: Booking,
        previous_room_id: Ulid,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    BookingDeleted {
        id: Ulid,
        room_id: Ulid,
    },
    /// Terminal booking of a deleted room. Emitted by compaction only.
    BookingArchived {
        booking: Booking,
    },
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub season_name: String,
    pub price_per_night: Decimal,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub day_type: DayType,
    pub is_active: bool,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideDraft {
    pub adjustment: Decimal,
    pub adjustment_type: AdjustmentType,
    pub reason: Option<String>,
    pub is_active: bool,
    pub effective_from: Option<NaiveDate>,
    pub effective_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub number: String,
    pub category_id: Ulid,
    pub floor_id: Option<Ulid>,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub id_card: Option<String>,
}

/// Who a booking is for: a known customer, or contact details to match or register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerRef {
    Existing(Ulid),
    New(CustomerInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_ids: Vec<Ulid>,
    pub customer: CustomerRef,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub category_id: Option<Ulid>,
    pub day_type: Option<DayType>,
    pub is_active: Option<bool>,
    pub season_name: Option<String>,
    /// Rule validity must contain this day.
    pub date: Option<NaiveDate>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &RateRule) -> bool {
        self.category_id.is_none_or(|c| rule.category_id == c)
            && self.day_type.is_none_or(|d| rule.day_type == d)
            && self.is_active.is_none_or(|a| rule.is_active == a)
            && self
                .season_name
                .as_deref()
                .is_none_or(|s| rule.season_name == s)
            && self.date.is_none_or(|d| rule.span.contains_day(d))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub room_id: Option<Ulid>,
    pub check_in_from: Option<NaiveDate>,
    pub check_in_to: Option<NaiveDate>,
    pub check_out_from: Option<NaiveDate>,
    pub check_out_to: Option<NaiveDate>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.status.is_none_or(|s| b.status == s)
            && self.room_id.is_none_or(|r| b.room_id == r)
            && self.check_in_from.is_none_or(|d| b.span.start >= d)
            && self.check_in_to.is_none_or(|d| b.span.start <= d)
            && self.check_out_from.is_none_or(|d| b.span.end >= d)
            && self.check_out_to.is_none_or(|d| b.span.end <= d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSearch {
    pub window: DateSpan,
    pub category_id: Option<Ulid>,
    pub floor_id: Option<Ulid>,
    pub min_capacity: Option<u32>,
}

// ── Query result types ───────────────────────────────────────────

/// Which rate layer produced the pre-override price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Seasonal,
    Base,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub price: Decimal,
    pub season_name: Option<String>,
    pub source: PriceSource,
    /// Override applied on top of the rate, if any.
    pub override_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day_of_week: String,
    pub price: Decimal,
    pub season_name: Option<String>,
    pub is_weekend: bool,
    pub is_base_price: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayQuote {
    pub room_id: Ulid,
    pub room_number: String,
    pub base_price: Decimal,
    pub nights: Vec<PriceQuote>,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub number: String,
    pub category_id: Ulid,
    pub floor_id: Option<Ulid>,
    pub capacity: u32,
    pub status: RoomStatus,
}

impl From<&RoomState> for RoomInfo {
    fn from(rs: &RoomState) -> Self {
        Self {
            id: rs.id,
            number: rs.number.clone(),
            category_id: rs.category_id,
            floor_id: rs.floor_id,
            capacity: rs.capacity,
            status: rs.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub id: Ulid,
    pub name: String,
    pub base_price: Decimal,
    pub max_capacity: u32,
}
