use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, Entity, FieldError, SharedCategory, SharedRoom, now_ms};

/// Recorded as `changed_by` when the caller names nobody.
const DEFAULT_ACTOR: &str = "System";

fn validate_category(name: &str, base_price: Decimal, max_capacity: u32) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("category name too long"));
    }
    if base_price > Decimal::from(MAX_PRICE) {
        return Err(EngineError::LimitExceeded("base price too large"));
    }
    let mut errors = Vec::new();
    if name.trim().is_empty() {
        errors.push(FieldError::new("Name", "Name is required."));
    }
    if base_price <= Decimal::ZERO {
        errors.push(FieldError::new("BasePrice", "Base price must be greater than 0."));
    }
    if max_capacity == 0 {
        errors.push(FieldError::new("MaxCapacity", "Max capacity must be greater than 0."));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

fn validate_room(room: &NewRoom) -> Result<(), EngineError> {
    if room.number.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room number too long"));
    }
    let mut errors = Vec::new();
    if room.number.trim().is_empty() {
        errors.push(FieldError::new("RoomNumber", "Room number is required."));
    }
    if room.capacity == 0 {
        errors.push(FieldError::new("Capacity", "Capacity must be greater than 0."));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(errors))
    }
}

impl Engine {
    // ── Room categories ──────────────────────────────────────────

    pub async fn create_category(
        &self,
        id: Ulid,
        name: String,
        base_price: Decimal,
        max_capacity: u32,
    ) -> Result<(), EngineError> {
        validate_category(&name, base_price, max_capacity)?;
        if self.categories.len() >= MAX_CATEGORIES {
            return Err(EngineError::LimitExceeded("too many room categories"));
        }
        let _gate = self.gate.read().await;
        let event = Event::CategoryCreated {
            id,
            name: name.clone(),
            base_price,
            max_capacity,
        };
        // Reserved write-locked so readers wait for the journal outcome.
        let shared: SharedCategory =
            Arc::new(RwLock::new(CategoryState::new(id, name, base_price, max_capacity)));
        let reserved = shared.clone().write_owned().await;
        match self.categories.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }
        if let Err(e) = self.journal_append(&event).await {
            self.categories.remove(&id);
            return Err(e);
        }
        drop(reserved);
        Ok(())
    }

    pub async fn update_category(
        &self,
        id: Ulid,
        name: String,
        base_price: Decimal,
        max_capacity: u32,
    ) -> Result<(), EngineError> {
        validate_category(&name, base_price, max_capacity)?;
        let _gate = self.gate.read().await;
        let mut cs = self.write_category(id).await?;
        let event = Event::CategoryUpdated {
            id,
            name,
            base_price,
            max_capacity,
        };
        self.commit_category(&mut cs, event).await
    }

    /// Refused while rooms are assigned to the category. Its rate rules go with it.
    pub async fn delete_category(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let cs = self.write_category(id).await?;
        if self.category_rooms.get(&id).is_some_and(|rooms| !rooms.is_empty()) {
            return Err(EngineError::HasRooms(id));
        }
        self.journal_append(&Event::CategoryDeleted { id }).await?;
        self.categories.remove(&id);
        self.retire_category(&cs);
        info!(category = %id, rules = cs.rules.len(), "room category deleted");
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────────────

    pub async fn create_room(&self, id: Ulid, room: NewRoom) -> Result<(), EngineError> {
        validate_room(&room)?;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let _gate = self.gate.read().await;
        // Held so the category cannot be deleted underneath the new room.
        let category = self.category(room.category_id)?.read_owned().await;
        if !self.categories.contains_key(&category.id) {
            return Err(EngineError::NotFound(Entity::Category, room.category_id));
        }

        let created = StatusChange {
            old_status: None,
            new_status: RoomStatus::Available,
            changed_by: DEFAULT_ACTOR.into(),
            reason: None,
            changed_at: now_ms(),
        };
        let event = Event::RoomCreated {
            id,
            number: room.number.clone(),
            category_id: room.category_id,
            floor_id: room.floor_id,
            capacity: room.capacity,
            created: created.clone(),
        };

        let mut rs = RoomState::new(id, room.number.clone(), room.category_id, room.floor_id, room.capacity);
        rs.history.push(created);
        let shared: SharedRoom = Arc::new(RwLock::new(rs));
        let reserved = shared.clone().write_owned().await;
        match self.rooms.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }
        match self.room_numbers.entry(room.number.clone()) {
            Entry::Occupied(_) => {
                self.rooms.remove(&id);
                return Err(EngineError::invalid("RoomNumber", "Room number is already in use."));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        if let Err(e) = self.journal_append(&event).await {
            self.rooms.remove(&id);
            self.room_numbers.remove(&room.number);
            return Err(e);
        }

        self.category_rooms.entry(room.category_id).or_default().push(id);
        drop(reserved);
        drop(category);
        Ok(())
    }

    /// Set a room's housekeeping status and append it to the status history.
    pub async fn change_room_status(
        &self,
        id: Ulid,
        status: RoomStatus,
        changed_by: Option<String>,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN)
            || changed_by.as_ref().is_some_and(|c| c.len() > MAX_NAME_LEN)
        {
            return Err(EngineError::LimitExceeded("status change note too long"));
        }
        let _gate = self.gate.read().await;
        let mut rs = self.write_room(id).await?;
        let change = StatusChange {
            old_status: Some(rs.status),
            new_status: status,
            changed_by: changed_by.unwrap_or_else(|| DEFAULT_ACTOR.into()),
            reason,
            changed_at: now_ms(),
        };
        self.commit_room(&mut rs, Event::RoomStatusChanged { room_id: id, change })
            .await
    }

    /// Newest first.
    pub async fn room_status_history(&self, id: Ulid) -> Result<Vec<StatusChange>, EngineError> {
        let rs = self.room(id)?;
        let guard = rs.read().await;
        Ok(guard.history.iter().rev().cloned().collect())
    }

    /// Refused while any booking still holds the room. Overrides are
    /// dropped; finished bookings move to the archive.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let rs = self.write_room(id).await?;
        let open = rs.open_bookings();
        if open > 0 {
            return Err(EngineError::HasBookings(id, open));
        }
        self.journal_append(&Event::RoomDeleted { id }).await?;
        self.retire_room(&rs);
        info!(room = %id, archived = rs.bookings.len(), "room deleted");
        Ok(())
    }
}
