use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{check_no_conflict, check_stay_length, find_conflict};
use super::{Engine, EngineError, Entity, FieldError, Transition, now_ms, today};

/// A requested room that could not be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomFailure {
    pub room_id: Ulid,
    pub room_number: String,
    pub reason: EngineError,
}

/// Result of a booking request that booked at least one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Created(Vec<Booking>),
    /// Some rooms were booked and committed; the rest were unavailable.
    Partial {
        created: Vec<Booking>,
        failed: Vec<RoomFailure>,
    },
}

impl BookingOutcome {
    pub fn created(&self) -> &[Booking] {
        match self {
            BookingOutcome::Created(created) | BookingOutcome::Partial { created, .. } => created,
        }
    }

    pub fn failed(&self) -> &[RoomFailure] {
        match self {
            BookingOutcome::Created(_) => &[],
            BookingOutcome::Partial { failed, .. } => failed,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, BookingOutcome::Partial { .. })
    }

    /// The partial outcome reported in the shape of a field error, for
    /// callers that surface it alongside validation failures.
    pub fn validation_errors(&self) -> Vec<FieldError> {
        match self {
            BookingOutcome::Created(_) => Vec::new(),
            BookingOutcome::Partial { created, failed } => vec![FieldError::new(
                "room",
                format!(
                    "Booking created for {} room(s). The following rooms were not available: {}",
                    created.len(),
                    room_numbers(failed)
                ),
            )],
        }
    }
}

fn room_numbers(failed: &[RoomFailure]) -> String {
    failed
        .iter()
        .map(|f| f.room_number.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn validate_stay(check_in: NaiveDate, check_out: NaiveDate, today: NaiveDate) -> Result<DateSpan, EngineError> {
    let mut errors = Vec::new();
    if check_in >= check_out {
        errors.push(FieldError::new(
            "checkOutDate",
            "Check-in date must be before check-out date.",
        ));
    }
    if check_in < today {
        errors.push(FieldError::new("checkInDate", "Check-in date cannot be in the past."));
    }
    if !errors.is_empty() {
        return Err(EngineError::Validation(errors));
    }
    let span = DateSpan::new(check_in, check_out);
    check_stay_length(&span)?;
    Ok(span)
}

fn validate_customer(info: &CustomerInfo) -> Result<(), EngineError> {
    if info.full_name.len() > MAX_NAME_LEN
        || info.email.as_ref().is_some_and(|e| e.len() > MAX_NAME_LEN)
        || info.id_card.as_ref().is_some_and(|c| c.len() > MAX_NAME_LEN)
    {
        return Err(EngineError::LimitExceeded("customer field too long"));
    }
    if info.phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone number too long"));
    }
    let mut errors = Vec::new();
    if info.full_name.trim().is_empty() {
        errors.push(FieldError::new("fullName", "Full name is required."));
    }
    if info.phone.trim().is_empty() {
        errors.push(FieldError::new("phone", "Phone number is required."));
    }
    if !errors.is_empty() {
        return Err(EngineError::Validation(errors));
    }
    Ok(())
}

impl Engine {
    /// Book every requested room for the same stay.
    ///
    /// Rooms are locked in id order and processed in request order. Rooms
    /// that are taken are reported in the outcome while the others are
    /// committed; when none can be booked the request fails as a whole.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingOutcome, EngineError> {
        let span = validate_stay(req.check_in, req.check_out, today())?;
        if req.room_ids.is_empty() {
            return Err(EngineError::invalid("roomIds", "At least one room must be selected."));
        }
        if req.room_ids.len() > MAX_ROOMS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many rooms in one booking"));
        }

        let _gate = self.gate.read().await;
        let mut missing: Vec<Ulid> = Vec::new();
        for id in &req.room_ids {
            if !self.rooms.contains_key(id) && !missing.contains(id) {
                missing.push(*id);
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::RoomsNotFound(missing));
        }

        let customer_id = match req.customer {
            CustomerRef::Existing(id) => {
                if !self.customers.contains_key(&id) {
                    return Err(EngineError::NotFound(Entity::Customer, id));
                }
                id
            }
            CustomerRef::New(info) => self.match_or_register(info).await?,
        };

        let mut guards = self.lock_rooms(&req.room_ids).await?;
        let mut created = Vec::new();
        let mut failed = Vec::new();
        // A journal failure stops the request; the rooms after it are reported unbooked.
        let mut aborted = None;

        let mut pending = req.room_ids.iter();
        while let Some(room_id) = pending.next() {
            let Some(guard) = guards.get_mut(room_id) else {
                continue;
            };
            let rs: &mut RoomState = guard;

            let admitted = if rs.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
                Err(EngineError::LimitExceeded("too many bookings on room"))
            } else {
                check_no_conflict(rs, &span, None)
            };
            let priced = match admitted {
                Ok(()) => self.stay_total(rs, &span).await,
                Err(reason) => Err(reason),
            };
            let total_amount = match priced {
                Ok(total) => total,
                Err(reason) => {
                    debug!(room = %rs.number, %reason, "room not available");
                    metrics::counter!(observability::BOOKING_ROOM_REJECTIONS_TOTAL).increment(1);
                    failed.push(RoomFailure {
                        room_id: *room_id,
                        room_number: rs.number.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let now = now_ms();
            let booking = Booking {
                id: Ulid::new(),
                room_id: *room_id,
                customer_id,
                span,
                total_amount,
                status: BookingStatus::Pending,
                created_at: now,
                updated_at: now,
            };
            let room_number = rs.number.clone();
            if let Err(reason) = self
                .commit_room(rs, Event::BookingCreated { booking: booking.clone() })
                .await
            {
                warn!(room = %room_number, %reason, committed = created.len(), "booking request cut short");
                failed.push(RoomFailure {
                    room_id: *room_id,
                    room_number,
                    reason: reason.clone(),
                });
                for rest in pending.by_ref() {
                    if let Some(rs) = guards.get(rest) {
                        failed.push(RoomFailure {
                            room_id: *rest,
                            room_number: rs.number.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
                aborted = Some(reason);
                break;
            }
            created.push(booking);
        }

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(created.len() as u64);
        info!(
            customer = %customer_id,
            requested = req.room_ids.len(),
            created = created.len(),
            failed = failed.len(),
            "booking request processed"
        );

        if created.is_empty() {
            if let Some(reason) = aborted {
                return Err(reason);
            }
            return Err(EngineError::invalid(
                "room",
                format!(
                    "All selected rooms are not available for the selected dates: {}",
                    room_numbers(&failed)
                ),
            ));
        }
        if failed.is_empty() {
            Ok(BookingOutcome::Created(created))
        } else {
            Ok(BookingOutcome::Partial { created, failed })
        }
    }

    /// Move a booking to another room and/or other dates. The total is
    /// re-priced only when the room or the dates actually change.
    pub async fn update_booking(
        &self,
        booking_id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Transition, EngineError> {
        let span = DateSpan::try_new(check_in, check_out).ok_or_else(|| {
            EngineError::invalid("checkInDate", "Check-in date must be before check-out date.")
        })?;
        check_stay_length(&span)?;

        let _gate = self.gate.read().await;
        if self.archive.contains_key(&booking_id) {
            return Ok(Transition::Rejected(
                "Only pending or confirmed bookings can be changed.".into(),
            ));
        }
        let current_room = self
            .get_room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        self.room(room_id)?;

        let mut guards = self.lock_rooms(&[current_room, room_id]).await?;
        let Some(booking) = guards
            .get(&current_room)
            .and_then(|rs| rs.booking(booking_id))
            .cloned()
        else {
            return Err(EngineError::NotFound(Entity::Booking, booking_id));
        };
        if !booking.status.is_changeable() {
            return Ok(Transition::Rejected(
                "Only pending or confirmed bookings can be changed.".into(),
            ));
        }

        let mut updated = Booking {
            updated_at: now_ms(),
            ..booking.clone()
        };
        if booking.room_id != room_id || booking.span != span {
            validate_stay(check_in, check_out, today())?;
            let Some(target) = guards.get(&room_id) else {
                return Err(EngineError::NotFound(Entity::Room, room_id));
            };
            if target.bookings.len() >= MAX_BOOKINGS_PER_ROOM && room_id != current_room {
                return Err(EngineError::LimitExceeded("too many bookings on room"));
            }
            if let Some(blocking) = find_conflict(target, &span, Some(booking_id)) {
                debug!(booking = %booking_id, blocking = %blocking.id, "booking change refused");
                return Ok(Transition::Rejected(
                    "Room is not available for the selected dates.".into(),
                ));
            }
            updated.total_amount = self.stay_total(target, &span).await?;
            updated.room_id = room_id;
            updated.span = span;
        }

        let event = Event::BookingUpdated {
            booking: updated,
            previous_room_id: current_room,
        };
        match (guards.remove(&current_room), guards.remove(&room_id)) {
            (Some(mut from), Some(mut to)) => self.commit_move(&mut from, &mut to, event).await?,
            (Some(mut same), None) => self.commit_room(&mut same, event).await?,
            _ => return Err(EngineError::NotFound(Entity::Room, room_id)),
        }
        Ok(Transition::Applied("Booking updated successfully.".into()))
    }

    /// Remove a booking record, live or archived.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let archived_room = self.archive.get(&booking_id).map(|b| b.room_id);
        if let Some(room_id) = archived_room {
            self.journal_append(&Event::BookingDeleted { id: booking_id, room_id })
                .await?;
            self.archive.remove(&booking_id);
            return Ok(());
        }

        let mut rs = self.booking_room_write(booking_id).await?;
        let room_id = rs.id;
        self.commit_room(&mut rs, Event::BookingDeleted { id: booking_id, room_id })
            .await
    }

    /// Match a customer by phone or email, registering a new one when none matches.
    pub async fn find_or_create_customer(&self, info: CustomerInfo) -> Result<Ulid, EngineError> {
        let _gate = self.gate.read().await;
        self.match_or_register(info).await
    }

    pub fn get_customer(&self, id: Ulid) -> Result<Customer, EngineError> {
        self.customers
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(EngineError::NotFound(Entity::Customer, id))
    }

    /// Caller holds the engine gate.
    async fn match_or_register(&self, info: CustomerInfo) -> Result<Ulid, EngineError> {
        validate_customer(&info)?;
        let _serial = self.customer_gate.lock().await;

        let by_phone = self.customers_by_phone.get(&info.phone).map(|e| *e.value());
        let by_email = info
            .email
            .as_ref()
            .and_then(|email| self.customers_by_email.get(email).map(|e| *e.value()));
        if let Some(id) = by_phone.or(by_email) {
            return Ok(id);
        }

        let customer = Customer {
            id: Ulid::new(),
            full_name: info.full_name,
            phone: info.phone,
            email: info.email,
            id_card: info.id_card,
        };
        let id = customer.id;
        self.journal_append(&Event::CustomerCreated { customer: customer.clone() })
            .await?;
        self.install_customer(customer);
        debug!(customer = %id, "customer registered");
        Ok(id)
    }
}
