mod availability;
mod booking;
mod compaction;
mod error;
mod inventory;
mod lifecycle;
mod overrides;
mod pricing;
mod queries;
mod rates;

pub use booking::{BookingOutcome, RoomFailure};
pub use error::{EngineError, Entity, FieldError};
pub use lifecycle::Transition;
pub use pricing::{resolve, select_rule};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;

pub type SharedRoom = Arc<RwLock<RoomState>>;
pub type SharedCategory = Arc<RwLock<CategoryState>>;

pub(crate) fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// The hotel's current calendar day.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ── Group-commit journal channel ─────────────────────────────────

pub(super) enum JournalCommand {
    Append(PendingAppend),
    Control(Control),
}

pub(super) enum Control {
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

pub(super) type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that queue up while a flush is in flight are
/// written together and share one fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            JournalCommand::Append(pending) => pending,
            JournalCommand::Control(ctl) => {
                handle_control(&mut journal, ctl);
                continue;
            }
        };
        let mut batch = vec![first];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append(pending)) => batch.push(pending),
                Ok(JournalCommand::Control(ctl)) => {
                    deferred = Some(ctl);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut journal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        // Controls run after the appends queued ahead of them.
        if let Some(ctl) = deferred {
            handle_control(&mut journal, ctl);
        }
    }
}

fn flush_batch(journal: &mut Journal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| journal.append_buffered(event));
    // Flush regardless so a failed batch leaves no buffered bytes behind.
    let flushed = journal.flush_sync();
    appended.and(flushed)
}

fn handle_control(journal: &mut Journal, ctl: Control) {
    match ctl {
        Control::Compact { events, response } => {
            let len = events.len() as u64;
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.install_snapshot(len));
            let _ = response.send(result);
        }
        Control::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
    }
}

/// Reverse lookups from child record id to the scope that owns it.
#[derive(Default)]
pub(super) struct Owners {
    /// Rate rule → category.
    pub rules: DashMap<Ulid, Ulid>,
    /// Price override → room.
    pub overrides: DashMap<Ulid, Ulid>,
    /// Booking → room.
    pub bookings: DashMap<Ulid, Ulid>,
}

pub struct Engine {
    pub(super) categories: DashMap<Ulid, SharedCategory>,
    pub(super) rooms: DashMap<Ulid, SharedRoom>,
    /// Category → rooms assigned to it.
    pub(super) category_rooms: DashMap<Ulid, Vec<Ulid>>,
    /// Room number → room.
    pub(super) room_numbers: DashMap<String, Ulid>,
    pub(super) customers: DashMap<Ulid, Customer>,
    pub(super) customers_by_phone: DashMap<String, Ulid>,
    pub(super) customers_by_email: DashMap<String, Ulid>,
    /// Serializes customer find-or-create.
    pub(super) customer_gate: Mutex<()>,
    pub(super) owners: Owners,
    /// Terminal bookings of deleted rooms.
    pub(super) archive: DashMap<Ulid, Booking>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot and the journal swap see no interleaved appends.
    pub(super) gate: RwLock<()>,
    journal_tx: mpsc::Sender<JournalCommand>,
}

/// Apply a room-scoped event. The caller holds the room's write lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, owners: &Owners) {
    match event {
        Event::RoomStatusChanged { change, .. } => {
            rs.status = change.new_status;
            rs.history.push(change.clone());
        }
        Event::OverrideAdded { ov } | Event::OverrideUpdated { ov } => {
            owners.overrides.insert(ov.id, ov.room_id);
            rs.upsert_override(ov.clone());
        }
        Event::OverrideRemoved { id, .. } => {
            rs.remove_override(*id);
            owners.overrides.remove(id);
        }
        Event::BookingCreated { booking } => {
            owners.bookings.insert(booking.id, booking.room_id);
            rs.upsert_booking(booking.clone());
        }
        Event::BookingUpdated { booking, .. } if booking.room_id == rs.id => {
            owners.bookings.insert(booking.id, booking.room_id);
            rs.upsert_booking(booking.clone());
        }
        // The room the booking moved away from
        Event::BookingUpdated { booking, .. } => {
            rs.remove_booking(booking.id);
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            if let Some(b) = rs.bookings.iter_mut().find(|b| b.id == *id) {
                b.status = *status;
                b.updated_at = *at;
            }
        }
        Event::BookingDeleted { id, .. } => {
            rs.remove_booking(*id);
            owners.bookings.remove(id);
        }
        _ => {}
    }
}

/// Apply a category-scoped event. The caller holds the category's write lock.
fn apply_to_category(cs: &mut CategoryState, event: &Event, owners: &Owners) {
    match event {
        Event::CategoryUpdated {
            name,
            base_price,
            max_capacity,
            ..
        } => {
            cs.name = name.clone();
            cs.base_price = *base_price;
            cs.max_capacity = *max_capacity;
        }
        Event::RuleAdded { rule } | Event::RuleUpdated { rule } => {
            owners.rules.insert(rule.id, rule.category_id);
            cs.upsert_rule(rule.clone());
        }
        Event::RuleRemoved { id, .. } => {
            cs.remove_rule(*id);
            owners.rules.remove(id);
        }
        _ => {}
    }
}

/// Which lock an event is applied under.
enum Scope {
    Room(Ulid),
    RoomPair { from: Ulid, to: Ulid },
    Category(Ulid),
    /// Map-level insert or removal.
    Engine,
}

fn event_scope(event: &Event) -> Scope {
    match event {
        Event::RoomStatusChanged { room_id, .. }
        | Event::OverrideRemoved { room_id, .. }
        | Event::BookingStatusChanged { room_id, .. }
        | Event::BookingDeleted { room_id, .. } => Scope::Room(*room_id),
        Event::OverrideAdded { ov } | Event::OverrideUpdated { ov } => Scope::Room(ov.room_id),
        Event::BookingCreated { booking } => Scope::Room(booking.room_id),
        Event::BookingUpdated {
            booking,
            previous_room_id,
        } => Scope::RoomPair {
            from: *previous_room_id,
            to: booking.room_id,
        },
        Event::CategoryUpdated { id, .. } => Scope::Category(*id),
        Event::RuleAdded { rule } | Event::RuleUpdated { rule } => Scope::Category(rule.category_id),
        Event::RuleRemoved { category_id, .. } => Scope::Category(*category_id),
        Event::CategoryCreated { .. }
        | Event::CategoryDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::CustomerCreated { .. }
        | Event::BookingArchived { .. } => Scope::Engine,
    }
}

impl Engine {
    /// Open the journal at `path`, rebuild state from it and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(path: PathBuf) -> io::Result<Self> {
        let (journal, events) = Journal::open(&path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            categories: DashMap::new(),
            rooms: DashMap::new(),
            category_rooms: DashMap::new(),
            room_numbers: DashMap::new(),
            customers: DashMap::new(),
            customers_by_phone: DashMap::new(),
            customers_by_email: DashMap::new(),
            customer_gate: Mutex::new(()),
            owners: Owners::default(),
            archive: DashMap::new(),
            gate: RwLock::new(()),
            journal_tx,
        };

        for event in &events {
            engine.replay(event);
        }
        info!(
            path = %path.display(),
            events = events.len(),
            categories = engine.categories.len(),
            rooms = engine.rooms.len(),
            bookings = engine.owners.bookings.len(),
            "journal replayed"
        );
        Ok(engine)
    }

    /// Replay one journaled event. Nothing else holds these Arcs yet, so
    /// `try_read`/`try_write` always succeed.
    fn replay(&self, event: &Event) {
        match event {
            Event::CategoryCreated {
                id,
                name,
                base_price,
                max_capacity,
            } => self.install_category(CategoryState::new(*id, name.clone(), *base_price, *max_capacity)),
            Event::CategoryDeleted { id } => {
                if let Some((_, cs)) = self.categories.remove(id)
                    && let Ok(cs) = cs.try_read()
                {
                    self.retire_category(&cs);
                }
            }
            Event::RoomCreated {
                id,
                number,
                category_id,
                floor_id,
                capacity,
                created,
            } => {
                let mut rs = RoomState::new(*id, number.clone(), *category_id, *floor_id, *capacity);
                rs.status = created.new_status;
                rs.history.push(created.clone());
                self.install_room(rs);
            }
            Event::RoomDeleted { id } => {
                if let Some(rs) = self.get_room(id)
                    && let Ok(rs) = rs.try_read()
                {
                    self.retire_room(&rs);
                }
            }
            Event::CustomerCreated { customer } => self.install_customer(customer.clone()),
            Event::BookingArchived { booking } => {
                self.archive.insert(booking.id, booking.clone());
            }
            Event::BookingDeleted { id, room_id } => {
                self.archive.remove(id);
                self.replay_on_room(*room_id, event);
            }
            other => match event_scope(other) {
                Scope::Room(id) => self.replay_on_room(id, other),
                Scope::RoomPair { from, to } => {
                    self.replay_on_room(to, other);
                    if from != to {
                        self.replay_on_room(from, other);
                    }
                }
                Scope::Category(id) => {
                    if let Some(cs) = self.get_category(&id)
                        && let Ok(mut guard) = cs.try_write()
                    {
                        apply_to_category(&mut guard, other, &self.owners);
                    }
                }
                Scope::Engine => {}
            },
        }
    }

    fn replay_on_room(&self, id: Ulid, event: &Event) {
        if let Some(rs) = self.get_room(&id)
            && let Ok(mut guard) = rs.try_write()
        {
            apply_to_room(&mut guard, event, &self.owners);
        }
    }

    // ── Map-level installs and removals ──────────────────────────

    pub(super) fn install_category(&self, cs: CategoryState) {
        let id = cs.id;
        for rule in &cs.rules {
            self.owners.rules.insert(rule.id, id);
        }
        self.categories.insert(id, Arc::new(RwLock::new(cs)));
    }

    /// Drop the index entries of a category already removed from the map.
    pub(super) fn retire_category(&self, cs: &CategoryState) {
        for rule in &cs.rules {
            self.owners.rules.remove(&rule.id);
        }
        self.category_rooms.remove(&cs.id);
    }

    pub(super) fn install_room(&self, rs: RoomState) {
        let id = rs.id;
        self.category_rooms.entry(rs.category_id).or_default().push(id);
        self.room_numbers.insert(rs.number.clone(), id);
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
    }

    /// Remove a room from every map. Terminal bookings move to the archive.
    pub(super) fn retire_room(&self, rs: &RoomState) {
        for ov in &rs.overrides {
            self.owners.overrides.remove(&ov.id);
        }
        for b in &rs.bookings {
            self.owners.bookings.remove(&b.id);
            self.archive.insert(b.id, b.clone());
        }
        if let Some(mut ids) = self.category_rooms.get_mut(&rs.category_id) {
            ids.retain(|r| *r != rs.id);
        }
        self.room_numbers.remove_if(&rs.number, |_, owner| *owner == rs.id);
        self.rooms.remove(&rs.id);
    }

    pub(super) fn install_customer(&self, customer: Customer) {
        self.customers_by_phone.insert(customer.phone.clone(), customer.id);
        if let Some(email) = &customer.email {
            self.customers_by_email.insert(email.clone(), customer.id);
        }
        self.customers.insert(customer.id, customer);
    }

    // ── Journal ──────────────────────────────────────────────────

    /// Write an event through the group-commit writer and wait for its fsync.
    pub(super) async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append((event.clone(), tx)))
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub(super) async fn journal_control(&self, ctl: Control) -> Result<(), EngineError> {
        self.journal_tx
            .send(JournalCommand::Control(ctl))
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))
    }

    /// Journal, then apply under the room lock the caller holds.
    pub(super) async fn commit_room(&self, rs: &mut RoomState, event: Event) -> Result<(), EngineError> {
        self.journal_append(&event).await?;
        apply_to_room(rs, &event, &self.owners);
        Ok(())
    }

    /// Journal, then apply a booking move to both rooms.
    pub(super) async fn commit_move(
        &self,
        from: &mut RoomState,
        to: &mut RoomState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.journal_append(&event).await?;
        apply_to_room(to, &event, &self.owners);
        apply_to_room(from, &event, &self.owners);
        Ok(())
    }

    /// Journal, then apply under the category lock the caller holds.
    pub(super) async fn commit_category(
        &self,
        cs: &mut CategoryState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.journal_append(&event).await?;
        apply_to_category(cs, &event, &self.owners);
        Ok(())
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoom> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_category(&self, id: &Ulid) -> Option<SharedCategory> {
        self.categories.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room(&self, id: Ulid) -> Result<SharedRoom, EngineError> {
        self.get_room(&id).ok_or(EngineError::NotFound(Entity::Room, id))
    }

    pub(super) fn category(&self, id: Ulid) -> Result<SharedCategory, EngineError> {
        self.get_category(&id)
            .ok_or(EngineError::NotFound(Entity::Category, id))
    }

    /// Room lookup followed by its write lock; fails if the room was
    /// deleted while we waited.
    pub(super) async fn write_room(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let guard = self.room(id)?.write_owned().await;
        if !self.rooms.contains_key(&id) {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        Ok(guard)
    }

    pub(super) async fn write_category(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<CategoryState>, EngineError> {
        let guard = self.category(id)?.write_owned().await;
        if !self.categories.contains_key(&id) {
            return Err(EngineError::NotFound(Entity::Category, id));
        }
        Ok(guard)
    }

    /// Write-lock several rooms in ascending id order. Every missing id is reported.
    pub(super) async fn lock_rooms(
        &self,
        ids: &[Ulid],
    ) -> Result<BTreeMap<Ulid, OwnedRwLockWriteGuard<RoomState>>, EngineError> {
        let mut arcs = BTreeMap::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.get_room(id) {
                Some(rs) => {
                    arcs.insert(*id, rs);
                }
                None if !missing.contains(id) => missing.push(*id),
                None => {}
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::RoomsNotFound(missing));
        }

        let mut guards = BTreeMap::new();
        for (id, rs) in arcs {
            guards.insert(id, rs.write_owned().await);
        }
        let vanished: Vec<Ulid> = guards
            .keys()
            .filter(|id| !self.rooms.contains_key(id))
            .copied()
            .collect();
        if !vanished.is_empty() {
            return Err(EngineError::RoomsNotFound(vanished));
        }
        Ok(guards)
    }

    pub fn get_room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.owners.bookings.get(booking_id).map(|e| *e.value())
    }

    pub fn get_category_for_rule(&self, rule_id: &Ulid) -> Option<Ulid> {
        self.owners.rules.get(rule_id).map(|e| *e.value())
    }

    pub fn get_room_for_override(&self, override_id: &Ulid) -> Option<Ulid> {
        self.owners.overrides.get(override_id).map(|e| *e.value())
    }

    /// Resolve a booking to its room and write-lock that room.
    pub(super) async fn booking_room_write(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .get_room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let guard = self.write_room(room_id).await?;
        // The booking may have moved rooms while we waited for the lock.
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(Entity::Booking, booking_id));
        }
        Ok(guard)
    }
}
