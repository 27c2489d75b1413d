use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only time type.
pub type Ms = i64;

/// Minor currency units (cents). Never a float.
pub type Money = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Nights covered by a stay: any partial day counts as a full night.
    pub fn nights(&self) -> i64 {
        (self.duration_ms() + DAY_MS - 1) / DAY_MS
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeekStart {
    Monday,
    Sunday,
}

impl WeekStart {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeekStart::Monday => "monday",
            WeekStart::Sunday => "sunday",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monday" | "mon" => Some(WeekStart::Monday),
            "sunday" | "sun" => Some(WeekStart::Sunday),
            _ => None,
        }
    }
}

/// Platform-wide settings managed by the admin back-office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// ISO-4217 code, uppercase.
    pub currency: String,
    /// Flat fee added to every stay, never discounted.
    pub service_fee: Money,
    /// Platform commission taken from the host's share, in basis points.
    pub commission_bps: u32,
    /// How long an unpaid hold keeps its nights.
    pub hold_ttl_ms: Ms,
    pub week_start: WeekStart,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            currency: "USD".into(),
            service_fee: 0,
            commission_bps: 1_000,
            hold_ttl_ms: 15 * 60_000,
            week_start: WeekStart::Monday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountKind {
    /// 10_000 basis points = 100%.
    Percentage { basis_points: u32 },
    Fixed { amount: Money },
}

impl DiscountKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiscountKind::Percentage { .. } => "percentage",
            DiscountKind::Fixed { .. } => "fixed",
        }
    }

    pub fn amount(&self) -> i64 {
        match self {
            DiscountKind::Percentage { basis_points } => *basis_points as i64,
            DiscountKind::Fixed { amount } => *amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Uppercase redemption code.
    pub code: String,
    pub kind: DiscountKind,
    /// `None` means unlimited.
    pub usage_limit: Option<u32>,
    /// Redeemable while `now < expires_at`.
    pub expires_at: Ms,
    pub min_subtotal: Money,
}

/// Frozen price breakdown for one stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub nights: i64,
    pub nightly_rate: Money,
    pub subtotal: Money,
    pub discount: Money,
    pub service_fee: Money,
    pub total: Money,
    pub commission: Money,
    pub host_payout: Money,
    pub voucher: Option<String>,
}

/// Who is staying and what they were charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub guest: String,
    pub guests: u32,
    pub quote: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingKind {
    Homestay { host_id: String },
    Room { price_per_night: Money, max_guests: u32 },
}

/// What an interval represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Opens nights for this range. Overrides inherited open rules.
    Open,
    /// Closes nights for this range. Accumulates with inherited blackouts.
    Blackout,
    /// Unpaid reservation that lapses at `expires_at`.
    Hold { expires_at: Ms, stay: Stay },
    /// Confirmed reservation.
    Booking { stay: Stay, payment_ref: Option<String> },
}

/// A single interval on a listing. Rules, holds, and bookings are all just intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_rule(&self) -> bool {
        matches!(self.kind, IntervalKind::Open | IntervalKind::Blackout)
    }

    pub fn is_allocation(&self) -> bool {
        matches!(self.kind, IntervalKind::Hold { .. } | IntervalKind::Booking { .. })
    }

    /// Bookings always; holds until they expire.
    pub fn is_active_allocation(&self, now: Ms) -> bool {
        match &self.kind {
            IntervalKind::Hold { expires_at, .. } => *expires_at > now,
            IntervalKind::Booking { .. } => true,
            _ => false,
        }
    }

    pub fn stay(&self) -> Option<&Stay> {
        match &self.kind {
            IntervalKind::Hold { stay, .. } | IntervalKind::Booking { stay, .. } => Some(stay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingState {
    pub id: Ulid,
    /// The owning homestay for rooms; `None` for homestays.
    pub parent_id: Option<Ulid>,
    pub name: Option<String>,
    pub kind: ListingKind,
    /// Identical units sold concurrently (default 1).
    pub units: u32,
    /// Cleaning time in ms blocked after each allocation ends.
    pub turnover: Option<Ms>,
    /// All intervals (rules + allocations), sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl ListingState {
    pub fn homestay(id: Ulid, host_id: String, name: Option<String>) -> Self {
        Self {
            id,
            parent_id: None,
            name,
            kind: ListingKind::Homestay { host_id },
            units: 1,
            turnover: None,
            intervals: Vec::new(),
        }
    }

    pub fn room(id: Ulid, homestay_id: Ulid, spec: RoomSpec) -> Self {
        Self {
            id,
            parent_id: Some(homestay_id),
            name: spec.name,
            kind: ListingKind::Room {
                price_per_night: spec.price_per_night,
                max_guests: spec.max_guests,
            },
            units: spec.units,
            turnover: spec.turnover,
            intervals: Vec::new(),
        }
    }

    pub fn is_room(&self) -> bool {
        matches!(self.kind, ListingKind::Room { .. })
    }

    pub fn host_id(&self) -> Option<&str> {
        match &self.kind {
            ListingKind::Homestay { host_id } => Some(host_id),
            ListingKind::Room { .. } => None,
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn get_interval(&self, id: &Ulid) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == *id)
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }
}

/// Mutable room attributes, shared by creation and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSpec {
    pub name: Option<String>,
    pub price_per_night: Money,
    pub max_guests: u32,
    pub units: u32,
    pub turnover: Option<Ms>,
}

/// One row of a multi-room booking as it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedStay {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub stay: Stay,
    pub payment_ref: Option<String>,
}

impl BookedStay {
    /// The single-room booking this row amounts to.
    pub fn into_event(self) -> Event {
        Event::BookingConfirmed {
            id: self.id,
            room_id: self.room_id,
            span: self.span,
            stay: self.stay,
            payment_ref: self.payment_ref,
        }
    }
}

/// The event types. Flat, no nesting beyond payloads. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HomestayCreated {
        id: Ulid,
        host_id: String,
        name: Option<String>,
    },
    RoomCreated {
        id: Ulid,
        homestay_id: Ulid,
        spec: RoomSpec,
    },
    RoomUpdated {
        id: Ulid,
        spec: RoomSpec,
    },
    ListingDeleted {
        id: Ulid,
    },
    RuleAdded {
        id: Ulid,
        listing_id: Ulid,
        span: Span,
        blocking: bool,
    },
    RuleRemoved {
        id: Ulid,
        listing_id: Ulid,
    },
    HoldPlaced {
        id: Ulid,
        room_id: Ulid,
        span: Span,
        expires_at: Ms,
        stay: Stay,
    },
    HoldReleased {
        id: Ulid,
        room_id: Ulid,
    },
    HoldConfirmed {
        id: Ulid,
        room_id: Ulid,
        payment_ref: String,
    },
    BookingConfirmed {
        id: Ulid,
        room_id: Ulid,
        span: Span,
        stay: Stay,
        payment_ref: Option<String>,
    },
    /// A multi-room booking. One record, so it replays whole or not at all.
    BookingsConfirmed {
        bookings: Vec<BookedStay>,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    VoucherCreated {
        voucher: Voucher,
        /// Allocations already redeemed against it. Only compaction fills this.
        redemptions: Vec<Ulid>,
    },
    VoucherDeleted {
        code: String,
    },
    SettingsUpdated {
        settings: PlatformSettings,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomestayInfo {
    pub id: Ulid,
    pub host_id: String,
    pub name: Option<String>,
    pub rooms: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub homestay_id: Ulid,
    pub name: Option<String>,
    pub price_per_night: Money,
    pub max_guests: u32,
    pub units: u32,
    pub turnover: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleInfo {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub blocking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub expires_at: Ms,
    pub stay: Stay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub homestay_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub stay: Stay,
    pub payment_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherInfo {
    pub voucher: Voucher,
    pub used: u32,
    /// `None` when the voucher is unlimited.
    pub remaining: Option<u32>,
}

/// A room free for a whole stay, with its price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vacancy {
    pub room: RoomInfo,
    pub quote: Quote,
}

/// Host revenue aggregated per homestay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevenueRow {
    pub homestay_id: Ulid,
    pub host_id: String,
    pub bookings: u64,
    pub nights: i64,
    pub gross: Money,
    pub discounts: Money,
    pub service_fees: Money,
    pub commission: Money,
    pub host_payout: Money,
}

/// What the calendar shows for one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Available,
    Held,
    Booked,
    Closed,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Available => "available",
            DayStatus::Held => "held",
            DayStatus::Booked => "booked",
            DayStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: chrono::NaiveDate,
    /// Row in the month grid, starting at 0.
    pub week: u32,
    /// Column in the month grid, 0 = first day of the week.
    pub column: u32,
    pub status: DayStatus,
}
