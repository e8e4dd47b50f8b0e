use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, Entity, now_ms, today};

/// The override that applies on `date`: active, effective that day, and
/// the most recently created among several.
pub(crate) fn select_override(overrides: &[PriceOverride], date: NaiveDate) -> Option<&PriceOverride> {
    overrides
        .iter()
        .filter(|o| o.is_effective_on(date))
        .max_by_key(|o| (o.created_at, o.id))
}

fn validate_draft(draft: &OverrideDraft) -> Result<(), EngineError> {
    if draft
        .reason
        .as_ref()
        .is_some_and(|r| r.len() > MAX_REASON_LEN)
    {
        return Err(EngineError::LimitExceeded("override reason too long"));
    }
    if draft.adjustment.abs() > Decimal::from(MAX_ADJUSTMENT) {
        return Err(EngineError::LimitExceeded("override adjustment too large"));
    }
    if let (Some(from), Some(to)) = (draft.effective_from, draft.effective_to)
        && to < from
    {
        return Err(EngineError::invalid(
            "EffectiveTo",
            "Effective end date cannot be before the effective start date.",
        ));
    }
    Ok(())
}

impl Engine {
    /// Add a price override. Fails while the room already has an active
    /// override that has not expired as of today.
    pub async fn add_override(&self, room_id: Ulid, draft: OverrideDraft) -> Result<Ulid, EngineError> {
        validate_draft(&draft)?;
        let _gate = self.gate.read().await;
        let mut rs = self.write_room(room_id).await?;
        if rs.overrides.len() >= MAX_OVERRIDES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many price overrides on room"));
        }
        let today = today();
        if let Some(existing) = rs.overrides.iter().find(|o| o.is_current(today)) {
            debug!(room = %room_id, existing = %existing.id, "active override already present");
            return Err(EngineError::invalid(
                "RoomId",
                "Active price override already exists for this room.",
            ));
        }

        let now = now_ms();
        let ov = PriceOverride {
            id: Ulid::new(),
            room_id,
            adjustment: draft.adjustment,
            adjustment_type: draft.adjustment_type,
            reason: draft.reason,
            is_active: draft.is_active,
            effective_from: draft.effective_from,
            effective_to: draft.effective_to,
            created_at: now,
            updated_at: now,
        };
        let id = ov.id;
        self.commit_room(&mut rs, Event::OverrideAdded { ov }).await?;
        Ok(id)
    }

    /// Replace an override's fields. The one-active-override check only runs on insert.
    pub async fn update_override(&self, id: Ulid, draft: OverrideDraft) -> Result<(), EngineError> {
        validate_draft(&draft)?;
        let _gate = self.gate.read().await;
        let mut rs = self.override_room_write(id).await?;
        let Some(current) = rs.overrides.iter().find(|o| o.id == id) else {
            return Err(EngineError::NotFound(Entity::PriceOverride, id));
        };
        let ov = PriceOverride {
            adjustment: draft.adjustment,
            adjustment_type: draft.adjustment_type,
            reason: draft.reason,
            is_active: draft.is_active,
            effective_from: draft.effective_from,
            effective_to: draft.effective_to,
            updated_at: now_ms(),
            ..current.clone()
        };
        self.commit_room(&mut rs, Event::OverrideUpdated { ov }).await
    }

    pub async fn delete_override(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let mut rs = self.override_room_write(id).await?;
        let room_id = rs.id;
        self.commit_room(&mut rs, Event::OverrideRemoved { id, room_id }).await
    }

    /// The override that would apply to `room_id` on `date`. Read-only.
    pub async fn active_override(
        &self,
        room_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<PriceOverride>, EngineError> {
        let rs = self.room(room_id)?;
        let guard = rs.read().await;
        Ok(select_override(&guard.overrides, date).cloned())
    }

    pub async fn list_overrides(&self, room_id: Ulid) -> Result<Vec<PriceOverride>, EngineError> {
        let rs = self.room(room_id)?;
        let guard = rs.read().await;
        let mut out = guard.overrides.clone();
        out.sort_by_key(|o| std::cmp::Reverse((o.created_at, o.id)));
        Ok(out)
    }

    async fn override_room_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .get_room_for_override(&id)
            .ok_or(EngineError::NotFound(Entity::PriceOverride, id))?;
        let guard = self.write_room(room_id).await?;
        if !guard.overrides.iter().any(|o| o.id == id) {
            return Err(EngineError::NotFound(Entity::PriceOverride, id));
        }
        Ok(guard)
    }
}
