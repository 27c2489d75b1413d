use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Rules a room picks up from its homestay, clamped to the query window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritedRules {
    /// `Some` when the parent has any open rules at all, even outside the window.
    pub open: Option<Vec<Span>>,
    pub blackout: Vec<Span>,
}

fn clamp(span: &Span, query: &Span) -> Span {
    Span::new(span.start.max(query.start), span.end.min(query.end))
}

/// Nights the rules leave open, ignoring reservations.
///
/// Open: OVERRIDE. The listing's own open rules win, then the parent's, and
/// with no open rules anywhere the whole window is open.
/// Blackout: ACCUMULATE. Own and inherited blackouts are all subtracted.
pub fn open_by_rules(listing: &ListingState, query: &Span, inherited: &InheritedRules) -> Vec<Span> {
    let has_own_open = listing
        .intervals
        .iter()
        .any(|i| matches!(i.kind, IntervalKind::Open));

    let mut own_open = Vec::new();
    let mut blocked = inherited.blackout.clone();
    for interval in listing.overlapping(query) {
        match interval.kind {
            IntervalKind::Open => own_open.push(clamp(&interval.span, query)),
            IntervalKind::Blackout => blocked.push(clamp(&interval.span, query)),
            _ => {}
        }
    }

    let mut free = if has_own_open {
        own_open
    } else {
        match &inherited.open {
            Some(spans) => spans.clone(),
            None => vec![*query],
        }
    };
    free.sort_by_key(|s| s.start);
    free = merge_overlapping(&free);

    if !blocked.is_empty() {
        blocked.sort_by_key(|s| s.start);
        free = subtract_intervals(&free, &merge_overlapping(&blocked));
    }
    free
}

/// Free spans for a room: rule-open nights minus the times every unit is
/// taken by an active hold or booking (each extended by turnover).
pub fn availability(listing: &ListingState, query: &Span, inherited: &InheritedRules, now: Ms) -> Vec<Span> {
    let free = open_by_rules(listing, query, inherited);
    let turnover = listing.turnover.unwrap_or(0);

    let mut allocs: Vec<Span> = listing
        .overlapping(&Span::new(query.start - turnover, query.end))
        .filter(|i| i.is_active_allocation(now))
        .map(|i| Span::new(i.span.start, i.span.end + turnover))
        .collect();
    if allocs.is_empty() {
        return free;
    }
    allocs.sort_by_key(|s| s.start);
    let saturated = compute_saturated_spans(&allocs, listing.units);
    subtract_intervals(&free, &saturated)
}

/// Spans where confirmed bookings alone fill every unit.
pub fn booked_saturation(listing: &ListingState, query: &Span) -> Vec<Span> {
    let turnover = listing.turnover.unwrap_or(0);
    let mut allocs: Vec<Span> = listing
        .overlapping(&Span::new(query.start - turnover, query.end))
        .filter(|i| matches!(i.kind, IntervalKind::Booking { .. }))
        .map(|i| Span::new(i.span.start, i.span.end + turnover))
        .collect();
    allocs.sort_by_key(|s| s.start);
    compute_saturated_spans(&allocs, listing.units)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// True when the disjoint, sorted `spans` cover all of `target`.
pub fn covers(spans: &[Span], target: &Span) -> bool {
    spans.iter().any(|s| s.contains_span(target))
}

/// Sweep-line algorithm: find time ranges where allocation count >= capacity.
/// Returns sorted, merged spans representing fully-saturated time ranges.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    // +1 at start, -1 at end; ends sort before starts at the same instant.
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<Span> = Vec::new();
    let mut count: i64 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        count += *delta as i64;

        if count >= capacity as i64 && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity as i64
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    merge_overlapping(&result)
}
