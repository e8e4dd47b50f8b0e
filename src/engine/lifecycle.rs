use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, now_ms, today};

/// Outcome of a booking operation whose business-rule refusals are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(String),
    Rejected(String),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Transition::Applied(m) | Transition::Rejected(m) => m,
        }
    }
}

/// Target status and success message, or the refusal message.
type Step = Result<(BookingStatus, &'static str), String>;

fn confirm_step(b: &Booking, _today: NaiveDate) -> Step {
    match b.status {
        BookingStatus::Pending => Ok((BookingStatus::Confirmed, "Booking confirmed successfully.")),
        _ => Err("Only pending bookings can be confirmed.".into()),
    }
}

fn check_in_step(b: &Booking, today: NaiveDate) -> Step {
    if b.status != BookingStatus::Confirmed {
        return Err("Only confirmed bookings can be checked in.".into());
    }
    if b.span.start > today {
        return Err("Cannot check in before the check-in date.".into());
    }
    Ok((BookingStatus::CheckedIn, "Checked in successfully."))
}

fn check_out_step(b: &Booking, _today: NaiveDate) -> Step {
    match b.status {
        BookingStatus::CheckedIn => Ok((BookingStatus::CheckedOut, "Checked out successfully.")),
        _ => Err("Only checked-in bookings can be checked out.".into()),
    }
}

fn cancel_step(b: &Booking, _today: NaiveDate) -> Step {
    match b.status {
        BookingStatus::Pending | BookingStatus::Confirmed => {
            Ok((BookingStatus::Canceled, "Booking cancelled successfully."))
        }
        other => Err(format!("Cannot cancel a booking with status {other}.")),
    }
}

impl Engine {
    pub async fn confirm(&self, booking_id: Ulid) -> Result<Transition, EngineError> {
        self.transition(booking_id, confirm_step).await
    }

    /// Refused before the check-in date.
    pub async fn check_in(&self, booking_id: Ulid) -> Result<Transition, EngineError> {
        self.transition(booking_id, check_in_step).await
    }

    pub async fn check_out(&self, booking_id: Ulid) -> Result<Transition, EngineError> {
        self.transition(booking_id, check_out_step).await
    }

    /// Allowed from Pending or Confirmed only.
    pub async fn cancel(&self, booking_id: Ulid) -> Result<Transition, EngineError> {
        self.transition(booking_id, cancel_step).await
    }

    async fn transition(
        &self,
        booking_id: Ulid,
        step: fn(&Booking, NaiveDate) -> Step,
    ) -> Result<Transition, EngineError> {
        let _gate = self.gate.read().await;
        let today = today();

        if let Some(archived) = self.archive.get(&booking_id) {
            let msg = match step(&archived, today) {
                Err(msg) => msg,
                Ok(_) => "Booking belongs to a deleted room.".into(),
            };
            return Ok(Transition::Rejected(msg));
        }

        let mut rs = self.booking_room_write(booking_id).await?;
        let Some(booking) = rs.booking(booking_id) else {
            return Err(EngineError::NotFound(super::Entity::Booking, booking_id));
        };
        let (status, msg) = match step(booking, today) {
            Ok(next) => next,
            Err(msg) => {
                debug!(booking = %booking_id, status = %booking.status, "transition refused");
                return Ok(Transition::Rejected(msg));
            }
        };

        let room_id = rs.id;
        let event = Event::BookingStatusChanged {
            id: booking_id,
            room_id,
            status,
            at: now_ms(),
        };
        self.commit_room(&mut rs, event).await?;
        Ok(Transition::Applied(msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            customer_id: Ulid::new(),
            span: DateSpan::new(d(10), d(12)),
            total_amount: Decimal::ZERO,
            status,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn check_in_waits_for_arrival_day() {
        let b = booking(BookingStatus::Confirmed);
        assert_eq!(
            check_in_step(&b, d(9)),
            Err("Cannot check in before the check-in date.".to_string())
        );
        assert_eq!(
            check_in_step(&b, d(10)),
            Ok((BookingStatus::CheckedIn, "Checked in successfully."))
        );
        // Late arrival is still allowed
        assert!(check_in_step(&b, d(11)).is_ok());
    }

    #[test]
    fn status_gate_is_checked_before_date() {
        let b = booking(BookingStatus::Pending);
        assert_eq!(
            check_in_step(&b, d(1)),
            Err("Only confirmed bookings can be checked in.".to_string())
        );
    }

    #[test]
    fn cancel_message_names_status() {
        let b = booking(BookingStatus::CheckedIn);
        assert_eq!(
            cancel_step(&b, d(1)),
            Err("Cannot cancel a booking with status CheckedIn.".to_string())
        );
        assert!(cancel_step(&booking(BookingStatus::Confirmed), d(1)).is_ok());
    }

    #[test]
    fn only_forward_moves() {
        assert!(confirm_step(&booking(BookingStatus::Confirmed), d(1)).is_err());
        assert!(check_out_step(&booking(BookingStatus::Confirmed), d(1)).is_err());
        assert!(check_out_step(&booking(BookingStatus::CheckedIn), d(1)).is_ok());
    }

    #[test]
    fn transition_accessors() {
        let t = Transition::Rejected("nope".into());
        assert!(!t.is_applied());
        assert_eq!(t.message(), "nope");
    }
}
