use ulid::Ulid;

use crate::calendar::CalendarError;
use crate::model::Span;
use crate::pricing::PricingError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    VoucherNotFound(String),
    AlreadyExists(Ulid),
    VoucherExists(String),
    Conflict(Ulid),
    CapacityExceeded(u32),
    Unavailable {
        span: Span,
        closed: Vec<Span>,
    },
    NotARoom(Ulid),
    NotAHomestay(Ulid),
    NotAHold(Ulid),
    HasChildren(Ulid),
    HasAllocations(Ulid),
    TooManyGuests {
        requested: u32,
        max: u32,
    },
    HoldExpired(Ulid),
    PaymentReused {
        payment_ref: String,
        booking: Ulid,
    },
    InvalidSpan {
        start: i64,
        end: i64,
    },
    InvalidArgument(String),
    Pricing(PricingError),
    Calendar(CalendarError),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::VoucherNotFound(code) => write!(f, "voucher not found: {code}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::VoucherExists(code) => write!(f, "voucher already exists: {code}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::CapacityExceeded(units) => {
                write!(f, "all {units} units are taken for these nights")
            }
            EngineError::Unavailable { span, closed } => write!(
                f,
                "stay [{}, {}) is not open for booking; closed: {:?}",
                span.start, span.end, closed
            ),
            EngineError::NotARoom(id) => write!(f, "listing {id} is not a room"),
            EngineError::NotAHomestay(id) => write!(f, "listing {id} is not a homestay"),
            EngineError::NotAHold(id) => write!(f, "{id} is not an open hold"),
            EngineError::HasChildren(id) => {
                write!(f, "cannot delete homestay {id}: it still has rooms")
            }
            EngineError::HasAllocations(id) => {
                write!(f, "cannot delete room {id}: it has upcoming reservations")
            }
            EngineError::TooManyGuests { requested, max } => {
                write!(f, "{requested} guests exceeds room maximum of {max}")
            }
            EngineError::HoldExpired(id) => write!(f, "hold {id} has expired"),
            EngineError::PaymentReused {
                payment_ref,
                booking,
            } => write!(f, "payment {payment_ref} already confirmed booking {booking}"),
            EngineError::InvalidSpan { start, end } => {
                write!(f, "invalid span: start {start} must be before end {end}")
            }
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::Pricing(e) => write!(f, "pricing: {e}"),
            EngineError::Calendar(e) => write!(f, "calendar: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<PricingError> for EngineError {
    fn from(e: PricingError) -> Self {
        EngineError::Pricing(e)
    }
}

impl From<CalendarError> for EngineError {
    fn from(e: CalendarError) -> Self {
        EngineError::Calendar(e)
    }
}
