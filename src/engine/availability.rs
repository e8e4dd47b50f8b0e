use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::{Engine, EngineError, SharedRoom};

/// First booking still holding the room that overlaps `span`, skipping `exclude`.
pub(crate) fn find_conflict<'a>(
    rs: &'a RoomState,
    span: &'a DateSpan,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    rs.overlapping(span)
        .find(|b| b.status.holds_room() && Some(b.id) != exclude)
}

/// Caller holds the room lock (read for queries, write for check-then-book).
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &DateSpan,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs, span, exclude) {
        Some(b) => Err(EngineError::Conflict(b.id)),
        None => Ok(()),
    }
}

pub(crate) fn check_stay_length(span: &DateSpan) -> Result<(), EngineError> {
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

impl Engine {
    /// Whether `room_id` is free for `[check_in, check_out)`.
    ///
    /// `check_in < check_out` is the caller's responsibility; an inverted
    /// window matches nothing and reports the room as free.
    pub async fn is_available(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        debug_assert!(check_in < check_out, "availability window must be non-empty");
        let rs = self.room(room_id)?;
        let guard = rs.read().await;
        let span = DateSpan { start: check_in, end: check_out };
        Ok(find_conflict(&guard, &span, exclude_booking_id).is_none())
    }

    /// Rooms in status Available that match the search filters and are free
    /// for the whole window, ordered by room number.
    pub async fn available_rooms(&self, search: &RoomSearch) -> Result<Vec<RoomInfo>, EngineError> {
        check_stay_length(&search.window)?;
        let candidates: Vec<SharedRoom> = match search.category_id {
            Some(cid) => self
                .category_rooms
                .get(&cid)
                .map(|ids| ids.iter().filter_map(|id| self.get_room(id)).collect())
                .unwrap_or_default(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };

        let mut rooms = Vec::new();
        for rs in candidates {
            let guard = rs.read().await;
            if guard.status != RoomStatus::Available
                || search.floor_id.is_some_and(|f| guard.floor_id != Some(f))
                || search.min_capacity.is_some_and(|c| guard.capacity < c)
            {
                continue;
            }
            if find_conflict(&guard, &search.window, None).is_none() {
                rooms.push(RoomInfo::from(&*guard));
            }
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
        Ok(rooms)
    }
}
