use ulid::Ulid;

/// One rejected input field, keyed the way callers label their form fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub issue: String,
}

impl FieldError {
    pub fn new(field: &'static str, issue: impl Into<String>) -> Self {
        Self {
            field,
            issue: issue.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Category,
    Room,
    RateRule,
    PriceOverride,
    Booking,
    Customer,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Entity::Category => "room category",
            Entity::Room => "room",
            Entity::RateRule => "rate rule",
            Entity::PriceOverride => "price override",
            Entity::Booking => "booking",
            Entity::Customer => "customer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation(Vec<FieldError>),
    NotFound(Entity, Ulid),
    RoomsNotFound(Vec<Ulid>),
    /// The requested stay collides with this booking.
    Conflict(Ulid),
    AlreadyExists(Ulid),
    HasRooms(Ulid),
    /// Room id and its count of bookings still holding it.
    HasBookings(Ulid, usize),
    LimitExceeded(&'static str),
    JournalError(String),
}

impl EngineError {
    pub fn invalid(field: &'static str, issue: impl Into<String>) -> Self {
        EngineError::Validation(vec![FieldError::new(field, issue)])
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            EngineError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(errors) => {
                write!(f, "validation failed")?;
                for (i, e) in errors.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{}: {}", e.field, e.issue)?;
                }
                Ok(())
            }
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::RoomsNotFound(ids) => {
                let ids: Vec<String> = ids.iter().map(Ulid::to_string).collect();
                write!(f, "rooms not found: {}", ids.join(", "))
            }
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasRooms(id) => {
                write!(f, "cannot delete room category {id}: rooms still assigned")
            }
            EngineError::HasBookings(id, n) => {
                write!(f, "cannot delete room {id}: {n} open booking(s)")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
