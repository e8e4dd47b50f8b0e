use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::{Control, Engine, EngineError, SharedCategory, SharedRoom};

impl Engine {
    /// Rewrite the journal as the shortest event sequence that rebuilds the
    /// current state. Mutations wait until the new journal is in place.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;
        let before = self.journal_appends_since_compact().await;
        let events = self.snapshot_events().await;
        let len = events.len();

        let (tx, rx) = oneshot::channel();
        self.journal_control(Control::Compact { events, response: tx })
            .await?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))?;
        info!(before, after = len, "journal compacted");
        Ok(())
    }

    /// Frames in the journal since it was opened or last compacted.
    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_control(Control::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let categories: Vec<SharedCategory> =
            self.categories.iter().map(|e| e.value().clone()).collect();
        for cs in categories {
            let cs = cs.read().await;
            events.push(Event::CategoryCreated {
                id: cs.id,
                name: cs.name.clone(),
                base_price: cs.base_price,
                max_capacity: cs.max_capacity,
            });
            events.extend(cs.rules.iter().map(|rule| Event::RuleAdded { rule: rule.clone() }));
        }

        events.extend(self.customers.iter().map(|e| Event::CustomerCreated {
            customer: e.value().clone(),
        }));

        let rooms: Vec<SharedRoom> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let rs = rs.read().await;
            let (created, later) = match rs.history.split_first() {
                Some((first, rest)) => (first.clone(), rest),
                None => (
                    StatusChange {
                        old_status: None,
                        new_status: rs.status,
                        changed_by: "System".into(),
                        reason: None,
                        changed_at: 0,
                    },
                    &[][..],
                ),
            };
            events.push(Event::RoomCreated {
                id: rs.id,
                number: rs.number.clone(),
                category_id: rs.category_id,
                floor_id: rs.floor_id,
                capacity: rs.capacity,
                created,
            });
            events.extend(later.iter().map(|change| Event::RoomStatusChanged {
                room_id: rs.id,
                change: change.clone(),
            }));
            events.extend(rs.overrides.iter().map(|ov| Event::OverrideAdded { ov: ov.clone() }));
            events.extend(rs.bookings.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }

        events.extend(self.archive.iter().map(|e| Event::BookingArchived {
            booking: e.value().clone(),
        }));
        events
    }
}
