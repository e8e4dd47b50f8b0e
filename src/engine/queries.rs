use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, Entity, SharedCategory, SharedRoom};

impl Engine {
    pub async fn get_rule(&self, rule_id: Ulid) -> Result<RateRule, EngineError> {
        let not_found = EngineError::NotFound(Entity::RateRule, rule_id);
        let category_id = self.get_category_for_rule(&rule_id).ok_or(not_found.clone())?;
        let cs = self.get_category(&category_id).ok_or(not_found.clone())?;
        let guard = cs.read().await;
        guard.rule(rule_id).cloned().ok_or(not_found)
    }

    /// Rules matching `filter`, ordered by start date, then priority, then id.
    pub async fn list_rules(&self, filter: &RuleFilter) -> Vec<RateRule> {
        let scopes: Vec<SharedCategory> = match filter.category_id {
            Some(id) => self.get_category(&id).into_iter().collect(),
            None => self.categories.iter().map(|e| e.value().clone()).collect(),
        };
        let mut rules = Vec::new();
        for cs in scopes {
            let guard = cs.read().await;
            rules.extend(guard.rules.iter().filter(|r| filter.matches(r)).cloned());
        }
        rules.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then(a.priority.cmp(&b.priority))
                .then(a.id.cmp(&b.id))
        });
        rules
    }

    /// Live or archived booking.
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        if let Some(room_id) = self.get_room_for_booking(&booking_id)
            && let Some(rs) = self.get_room(&room_id)
        {
            let guard = rs.read().await;
            if let Some(b) = guard.booking(booking_id) {
                return Ok(b.clone());
            }
        }
        self.archive
            .get(&booking_id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))
    }

    /// Bookings matching `filter`, archive included, latest check-in first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let scopes: Vec<SharedRoom> = match filter.room_id {
            Some(id) => self.get_room(&id).into_iter().collect(),
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };
        let mut bookings = Vec::new();
        for rs in scopes {
            let guard = rs.read().await;
            bookings.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        bookings.extend(
            self.archive
                .iter()
                .filter(|e| filter.matches(e.value()))
                .map(|e| e.value().clone()),
        );
        bookings.sort_by_key(|b| Reverse((b.span.start, b.created_at, b.id)));
        bookings
    }

    /// Ordered by room number.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let all: Vec<SharedRoom> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(all.len());
        for rs in all {
            rooms.push(RoomInfo::from(&*rs.read().await));
        }
        rooms.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn category_info(&self, id: Ulid) -> Result<CategoryInfo, EngineError> {
        let cs = self.category(id)?;
        let guard = cs.read().await;
        Ok(CategoryInfo {
            id: guard.id,
            name: guard.name.clone(),
            base_price: guard.base_price,
            max_capacity: guard.max_capacity,
        })
    }

    pub async fn list_categories(&self) -> Vec<CategoryInfo> {
        let all: Vec<SharedCategory> = self.categories.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(all.len());
        for cs in all {
            let guard = cs.read().await;
            out.push(CategoryInfo {
                id: guard.id,
                name: guard.name.clone(),
                base_price: guard.base_price,
                max_capacity: guard.max_capacity,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }
}
