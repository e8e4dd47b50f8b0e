use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::OwnedRwLockReadGuard;
use ulid::Ulid;

use crate::limits::MAX_CALENDAR_DAYS;
use crate::model::*;
use crate::observability;

use super::availability::check_stay_length;
use super::{Engine, EngineError, Entity};

/// Precedence between two candidate rules for the same day: lower priority
/// value first, then a rule scoped to the exact day type over `All`, then
/// the newest, then the greatest id.
fn precedence(a: &RateRule, b: &RateRule) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| (a.day_type == DayType::All).cmp(&(b.day_type == DayType::All)))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}

/// The active rule that prices `date`, if any.
pub fn select_rule(rules: &[RateRule], date: NaiveDate, day_type: DayType) -> Option<&RateRule> {
    rules
        .iter()
        .filter(|r| r.is_active && r.span.contains_day(date) && r.day_type.matches(day_type))
        .min_by(|a, b| precedence(a, b))
}

fn price_out_of_range() -> EngineError {
    EngineError::LimitExceeded("price out of range")
}

/// Resolve one night for a room of `category`. Pure over the two snapshots.
pub fn resolve(
    category: &CategoryState,
    room: &RoomState,
    date: NaiveDate,
) -> Result<PriceQuote, EngineError> {
    let day_type = DayType::of(date);
    let (rate, season_name, source) =
        match select_rule(category.rules_starting_by(date), date, day_type) {
            Some(rule) => (
                rule.price_per_night,
                Some(rule.season_name.clone()),
                PriceSource::Seasonal,
            ),
            None => (category.base_price, None, PriceSource::Base),
        };

    let ov = super::overrides::select_override(&room.overrides, date);
    let price = match ov {
        Some(o) => o.apply(rate).ok_or_else(price_out_of_range)?,
        None => rate,
    }
    .max(Decimal::ZERO);

    Ok(PriceQuote {
        date,
        day_type,
        price,
        season_name,
        source,
        override_id: ov.map(|o| o.id),
    })
}

pub(crate) fn quote(
    category: &CategoryState,
    room: &RoomState,
    span: &DateSpan,
) -> Result<StayQuote, EngineError> {
    let nights = span
        .days()
        .map(|d| resolve(category, room, d))
        .collect::<Result<Vec<_>, _>>()?;
    let total = nights
        .iter()
        .try_fold(Decimal::ZERO, |acc, n| acc.checked_add(n.price))
        .ok_or_else(price_out_of_range)?;
    Ok(StayQuote {
        room_id: room.id,
        room_number: room.number.clone(),
        base_price: category.base_price,
        nights,
        total,
    })
}

fn calendar_day(q: PriceQuote) -> CalendarDay {
    CalendarDay {
        day_of_week: q.date.format("%A").to_string(),
        is_weekend: q.day_type == DayType::Weekend,
        is_base_price: q.source == PriceSource::Base,
        date: q.date,
        price: q.price,
        season_name: q.season_name,
    }
}

/// `check_out > check_in`, reported against the check-out field.
pub(crate) fn stay_span(check_in: NaiveDate, check_out: NaiveDate) -> Result<DateSpan, EngineError> {
    DateSpan::try_new(check_in, check_out).ok_or_else(|| {
        EngineError::invalid("checkOutDate", "Check-in date must be before check-out date.")
    })
}

impl Engine {
    pub async fn resolve_nightly_price(
        &self,
        room_id: Ulid,
        date: NaiveDate,
    ) -> Result<PriceQuote, EngineError> {
        let rs = self.room(room_id)?;
        let room = rs.read().await;
        let cs = self.category(room.category_id)?;
        let category = cs.read().await;

        let q = resolve(&category, &room, date)?;
        metrics::counter!(
            observability::PRICE_RESOLUTIONS_TOTAL,
            "source" => observability::source_label(q.source)
        )
        .increment(1);
        Ok(q)
    }

    /// Day-by-day prices from `start` through `end`, both included.
    pub async fn price_calendar(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarDay>, EngineError> {
        if end <= start {
            return Err(EngineError::invalid("EndDate", "End date must be after start date."));
        }
        if (end - start).num_days() + 1 > MAX_CALENDAR_DAYS {
            return Err(EngineError::LimitExceeded("calendar range too long"));
        }
        let rs = self.room(room_id)?;
        let room = rs.read().await;
        let cs = self.category(room.category_id)?;
        let category = cs.read().await;

        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| resolve(&category, &room, d).map(calendar_day))
            .collect()
    }

    /// Nightly breakdown and total for `[check_in, check_out)`.
    pub async fn quote_stay(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<StayQuote, EngineError> {
        let span = stay_span(check_in, check_out)?;
        check_stay_length(&span)?;
        let rs = self.room(room_id)?;
        let room = rs.read().await;
        let cs = self.category(room.category_id)?;
        let category = cs.read().await;
        quote(&category, &room, &span)
    }

    /// Charge for `span` on a room whose lock the caller holds.
    pub(super) async fn stay_total(
        &self,
        room: &RoomState,
        span: &DateSpan,
    ) -> Result<Decimal, EngineError> {
        let category = self.category_read(room).await?;
        Ok(quote(&category, room, span)?.total)
    }

    /// Read-lock the category of a room whose lock the caller holds.
    pub(super) async fn category_read(
        &self,
        room: &RoomState,
    ) -> Result<OwnedRwLockReadGuard<CategoryState>, EngineError> {
        let cs = self
            .get_category(&room.category_id)
            .ok_or(EngineError::NotFound(Entity::Category, room.category_id))?;
        Ok(cs.read_owned().await)
    }
}
