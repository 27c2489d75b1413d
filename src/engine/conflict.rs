use ulid::Ulid;

use crate::model::*;

use super::availability::{compute_saturated_spans, covers, open_by_rules, subtract_intervals, InheritedRules};
use super::EngineError;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Build a span from raw client input, rejecting empty/inverted and out-of-range spans.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidSpan { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = validate_span(start, end)?;
    if span.duration_ms() > crate::limits::MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(span)
}

/// Nightly rate and guest cap of a room listing.
pub(crate) fn room_terms(rs: &ListingState) -> Result<(Money, u32), EngineError> {
    match rs.kind {
        ListingKind::Room {
            price_per_night,
            max_guests,
        } => Ok((price_per_night, max_guests)),
        ListingKind::Homestay { .. } => Err(EngineError::NotARoom(rs.id)),
    }
}

pub(crate) fn check_guests(rs: &ListingState, guests: u32) -> Result<(), EngineError> {
    let (_, max) = room_terms(rs)?;
    if guests == 0 {
        return Err(EngineError::InvalidArgument("a stay needs at least one guest".into()));
    }
    if guests > max {
        return Err(EngineError::TooManyGuests {
            requested: guests,
            max,
        });
    }
    Ok(())
}

pub(crate) fn check_no_conflict(rs: &ListingState, span: &Span, now: Ms) -> Result<(), EngineError> {
    check_no_conflict_with(rs, span, now, &[])
}

/// Like `check_no_conflict`, also counting `pending` stays that are about to
/// be committed alongside this one.
pub(crate) fn check_no_conflict_with(
    rs: &ListingState,
    span: &Span,
    now: Ms,
    pending: &[(Ulid, Span)],
) -> Result<(), EngineError> {
    let turnover = rs.turnover.unwrap_or(0);
    // Widen the search so an earlier stay's cleaning time still counts, and so
    // does ours reaching into the next stay.
    let search_span = Span::new(span.start - turnover, span.end + turnover);
    let ours = Span::new(span.start, span.end + turnover);

    if rs.units <= 1 {
        let existing = rs
            .overlapping(&search_span)
            .filter(|i| i.is_active_allocation(now))
            .map(|i| (i.id, i.span));
        for (id, other) in existing.chain(pending.iter().copied()) {
            let effective = Span::new(other.start, other.end + turnover);
            if effective.overlaps(span) || ours.overlaps(&other) {
                return Err(EngineError::Conflict(id));
            }
        }
    } else {
        let mut allocs = collect_active_allocs_with_turnover(rs, &search_span, now, turnover);
        allocs.extend(
            pending
                .iter()
                .filter(|(_, p)| p.overlaps(&search_span))
                .map(|(_, p)| Span::new(p.start, p.end + turnover)),
        );
        allocs.sort_by_key(|s| s.start);
        for sat in compute_saturated_spans(&allocs, rs.units) {
            if sat.overlaps(&ours) {
                return Err(EngineError::CapacityExceeded(rs.units));
            }
        }
    }
    Ok(())
}

/// Reject a stay the listing's rules don't fully open.
pub(crate) fn check_open(rs: &ListingState, span: &Span, inherited: &InheritedRules) -> Result<(), EngineError> {
    let open = open_by_rules(rs, span, inherited);
    if covers(&open, span) {
        return Ok(());
    }
    Err(EngineError::Unavailable {
        span: *span,
        closed: subtract_intervals(&[*span], &open),
    })
}

/// Active allocation spans extended by the room's turnover time.
pub(crate) fn collect_active_allocs_with_turnover(
    rs: &ListingState,
    query: &Span,
    now: Ms,
    turnover: Ms,
) -> Vec<Span> {
    let mut allocs: Vec<Span> = rs
        .overlapping(query)
        .filter(|i| i.is_active_allocation(now))
        .map(|i| Span::new(i.span.start, i.span.end + turnover))
        .collect();
    allocs.sort_by_key(|s| s.start);
    allocs
}
