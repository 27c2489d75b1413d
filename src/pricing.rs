//! Stay pricing: nights × nightly rate, voucher discount, service fee, and the
//! host/platform split. All arithmetic is integer minor units and checked.

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    InvalidStay(i64),
    VoucherExpired(String),
    VoucherExhausted(String),
    BelowMinimumSpend { code: String, min_subtotal: Money },
    Overflow,
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::InvalidStay(n) => {
                write!(f, "stay of {n} nights outside 1..={MAX_STAY_NIGHTS}")
            }
            PricingError::VoucherExpired(code) => write!(f, "voucher {code} has expired"),
            PricingError::VoucherExhausted(code) => {
                write!(f, "voucher {code} has no redemptions left")
            }
            PricingError::BelowMinimumSpend { code, min_subtotal } => {
                write!(f, "voucher {code} requires a subtotal of at least {min_subtotal}")
            }
            PricingError::Overflow => write!(f, "price arithmetic overflow"),
        }
    }
}

impl std::error::Error for PricingError {}

/// A voucher plus how many times it has already been redeemed.
#[derive(Debug, Clone, Copy)]
pub struct VoucherUse<'a> {
    pub voucher: &'a Voucher,
    pub used: u32,
}

/// Apply `bps` basis points to `amount`, rounding toward zero.
fn apply_bps(amount: Money, bps: u32) -> Result<Money, PricingError> {
    amount
        .checked_mul(bps as i64)
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(PricingError::Overflow)
}

/// Check the voucher can be redeemed against `subtotal` and return the discount.
pub fn voucher_discount(use_: VoucherUse<'_>, subtotal: Money, now: Ms) -> Result<Money, PricingError> {
    let v = use_.voucher;
    if now >= v.expires_at {
        return Err(PricingError::VoucherExpired(v.code.clone()));
    }
    if let Some(limit) = v.usage_limit
        && use_.used >= limit {
            return Err(PricingError::VoucherExhausted(v.code.clone()));
        }
    if subtotal < v.min_subtotal {
        return Err(PricingError::BelowMinimumSpend {
            code: v.code.clone(),
            min_subtotal: v.min_subtotal,
        });
    }
    let discount = match v.kind {
        DiscountKind::Percentage { basis_points } => apply_bps(subtotal, basis_points.min(10_000))?,
        DiscountKind::Fixed { amount } => amount.clamp(0, subtotal),
    };
    Ok(discount)
}

/// Price a stay of `span` at `nightly_rate`.
///
/// The discount only ever reduces the room charge; the service fee is added
/// afterwards and the platform commission is taken from what the host earns.
pub fn quote(
    nightly_rate: Money,
    span: &Span,
    settings: &PlatformSettings,
    voucher: Option<VoucherUse<'_>>,
    now: Ms,
) -> Result<Quote, PricingError> {
    let nights = span.nights();
    if !(1..=MAX_STAY_NIGHTS).contains(&nights) {
        return Err(PricingError::InvalidStay(nights));
    }
    let subtotal = nightly_rate
        .checked_mul(nights)
        .ok_or(PricingError::Overflow)?;

    let discount = match voucher {
        Some(v) => voucher_discount(v, subtotal, now)?,
        None => 0,
    };
    let room_charge = subtotal - discount;
    let total = room_charge
        .checked_add(settings.service_fee)
        .ok_or(PricingError::Overflow)?;
    let commission = apply_bps(room_charge, settings.commission_bps)?;

    Ok(Quote {
        nights,
        nightly_rate,
        subtotal,
        discount,
        service_fee: settings.service_fee,
        total,
        commission,
        host_payout: room_charge - commission,
        voucher: voucher.map(|v| v.voucher.code.clone()),
    })
}
