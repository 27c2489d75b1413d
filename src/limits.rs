//! Hard caps on tenant state and request sizes.

use crate::model::{Ms, DAY_MS};

pub const MAX_LISTINGS_PER_TENANT: usize = 100_000;
pub const MAX_INTERVALS_PER_LISTING: usize = 50_000;
pub const MAX_VOUCHERS_PER_TENANT: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GUEST_LEN: usize = 256;
pub const MAX_CODE_LEN: usize = 64;
pub const MAX_PAYMENT_REF_LEN: usize = 256;

pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_IN_CLAUSE_IDS: usize = 1_000;

/// Largest ledger record; a longer length prefix on replay is corruption.
pub const MAX_WAL_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Widest window an availability or calendar query may cover (2 years).
pub const MAX_QUERY_WINDOW_MS: Ms = 731 * DAY_MS;
pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_GUESTS_PER_ROOM: u32 = 100;
pub const MAX_UNITS_PER_ROOM: u32 = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MIN_HOLD_TTL_MS: Ms = 60_000;
pub const MAX_HOLD_TTL_MS: Ms = DAY_MS;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;
