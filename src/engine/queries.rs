use ulid::Ulid;

use crate::calendar::{night_of, MonthGrid};
use crate::limits::*;
use crate::model::*;
use crate::pricing::{self, VoucherUse};

use super::availability::{availability, booked_saturation, covers, open_by_rules, InheritedRules};
use super::conflict::{now_ms, room_terms, validate_span, validate_window};
use super::{Engine, EngineError};

/// Which bookings to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingFilter {
    Room(Ulid),
    Homestay(Ulid),
    Host(String),
    All,
}

fn clamp(span: &Span, query: &Span) -> Span {
    Span::new(span.start.max(query.start), span.end.min(query.end))
}

impl Engine {
    /// Rules a listing inherits from its homestay, clamped to `query`.
    ///
    /// Open: OVERRIDE. The parent's open rules only apply when the listing has
    /// none of its own, which `open_by_rules` decides.
    /// Blackout: ACCUMULATE. The parent's blackouts always apply.
    pub(super) async fn collect_inherited_rules(
        &self,
        listing: &ListingState,
        query: &Span,
    ) -> Result<InheritedRules, EngineError> {
        let Some(pid) = listing.parent_id else {
            return Ok(InheritedRules::default());
        };
        let parent_rs = self.get_listing(&pid).ok_or(EngineError::NotFound(pid))?;
        let parent = parent_rs.read().await;

        let has_open = parent
            .intervals
            .iter()
            .any(|i| matches!(i.kind, IntervalKind::Open));
        let mut open = Vec::new();
        let mut blackout = Vec::new();
        for interval in parent.overlapping(query) {
            match interval.kind {
                IntervalKind::Open => open.push(clamp(&interval.span, query)),
                IntervalKind::Blackout => blackout.push(clamp(&interval.span, query)),
                _ => {}
            }
        }
        blackout.sort_by_key(|s| s.start);

        Ok(InheritedRules {
            open: has_open.then_some(open),
            blackout,
        })
    }

    pub async fn compute_availability(
        &self,
        listing_id: Ulid,
        query_start: Ms,
        query_end: Ms,
        min_nights: Option<i64>,
    ) -> Result<Vec<Span>, EngineError> {
        let query = validate_window(query_start, query_end)?;
        let Some(rs) = self.get_listing(&listing_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        let inherited = self.collect_inherited_rules(&guard, &query).await?;
        let mut free = availability(&guard, &query, &inherited, now_ms());

        if let Some(n) = min_nights {
            free.retain(|span| span.duration_ms() >= n.saturating_mul(DAY_MS));
        }
        Ok(free)
    }

    /// Spans where at least `min_rooms` rooms of the homestay are free at once.
    pub async fn compute_homestay_availability(
        &self,
        homestay_id: Ulid,
        query_start: Ms,
        query_end: Ms,
        min_rooms: usize,
        min_nights: Option<i64>,
    ) -> Result<Vec<Span>, EngineError> {
        validate_window(query_start, query_end)?;
        // Copy the ids out; never hold the homestay lock while reading rooms.
        let room_ids = self
            .children
            .get(&homestay_id)
            .map(|kids| kids.value().clone())
            .unwrap_or_default();
        if room_ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if room_ids.is_empty() || min_rooms == 0 {
            return Ok(Vec::new());
        }

        let mut all_events: Vec<(Ms, i32)> = Vec::new();
        for rid in room_ids {
            let spans = self
                .compute_availability(rid, query_start, query_end, None)
                .await?;
            for s in spans {
                all_events.push((s.start, 1));
                all_events.push((s.end, -1));
            }
        }

        all_events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut result = Vec::new();
        let mut count: i32 = 0;
        let mut seg_start: Option<Ms> = None;
        let threshold = min_rooms as i32;
        let min_ms = min_nights.map(|n| n.saturating_mul(DAY_MS));

        for (time, delta) in &all_events {
            let prev = count;
            count += delta;

            if prev < threshold && count >= threshold {
                seg_start = Some(*time);
            } else if prev >= threshold
                && count < threshold
                && let Some(start) = seg_start.take()
                && *time > start
            {
                let span = Span::new(start, *time);
                if min_ms.is_none_or(|d| span.duration_ms() >= d) {
                    result.push(span);
                }
            }
        }

        Ok(result)
    }

    /// Rooms free for the whole stay that fit `guests`, cheapest first.
    pub async fn search_vacancies(
        &self,
        start: Ms,
        end: Ms,
        guests: u32,
        homestay_id: Option<Ulid>,
    ) -> Result<Vec<Vacancy>, EngineError> {
        let stay = validate_window(start, end)?;
        let settings = self.settings.read().await.clone();
        let room_ids: Vec<Ulid> = match homestay_id {
            Some(hid) => self.children.get(&hid).map(|k| k.value().clone()).unwrap_or_default(),
            None => self.children.iter().flat_map(|e| e.value().clone()).collect(),
        };

        let now = now_ms();
        let mut out = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_listing(&rid) else {
                continue;
            };
            let guard = rs.read().await;
            let Ok((rate, max_guests)) = room_terms(&guard) else {
                continue;
            };
            if guests > max_guests {
                continue;
            }
            let inherited = self.collect_inherited_rules(&guard, &stay).await?;
            if !covers(&availability(&guard, &stay, &inherited, now), &stay) {
                continue;
            }
            let quote = pricing::quote(rate, &stay, &settings, None, now)?;
            out.push(Vacancy {
                room: room_info(&guard),
                quote,
            });
        }
        out.sort_by(|a, b| a.quote.total.cmp(&b.quote.total).then(a.room.id.cmp(&b.room.id)));
        Ok(out)
    }

    /// Price a stay without reserving it. The voucher is checked but not redeemed.
    pub async fn quote_stay(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        voucher: Option<&str>,
    ) -> Result<Quote, EngineError> {
        let span = validate_span(start, end)?;
        let settings = self.settings.read().await.clone();
        let rs = self.get_listing(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let rate = {
            let guard = rs.read().await;
            room_terms(&guard)?.0
        };
        let now = now_ms();
        match voucher {
            Some(code) => {
                let vs = self.lock_voucher(code).await?;
                let use_ = VoucherUse {
                    voucher: &vs.voucher,
                    used: vs.used(),
                };
                Ok(pricing::quote(rate, &span, &settings, Some(use_), now)?)
            }
            None => Ok(pricing::quote(rate, &span, &settings, None, now)?),
        }
    }

    /// One row per night of the month, laid out on the settings' week grid.
    pub async fn room_calendar(&self, room_id: Ulid, year: i32, month: u32) -> Result<Vec<CalendarDay>, EngineError> {
        let week_start = self.settings.read().await.week_start;
        let grid = MonthGrid::new(year, month, week_start)?;
        let month_span = grid.span();
        let month_span = validate_window(month_span.start, month_span.end)?;
        let Some(rs) = self.get_listing(&room_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        if !guard.is_room() {
            return Err(EngineError::NotARoom(room_id));
        }

        let inherited = self.collect_inherited_rules(&guard, &month_span).await?;
        let rule_open = open_by_rules(&guard, &month_span, &inherited);
        let free = availability(&guard, &month_span, &inherited, now_ms());
        let booked = booked_saturation(&guard, &month_span);

        let mut days = Vec::with_capacity(grid.days_in_month() as usize);
        for date in grid.dates() {
            let night = night_of(date);
            let status = if !covers(&rule_open, &night) {
                DayStatus::Closed
            } else if covers(&free, &night) {
                DayStatus::Available
            } else if booked.iter().any(|s| s.overlaps(&night)) {
                DayStatus::Booked
            } else {
                DayStatus::Held
            };
            let (week, column) = grid.position(date).unwrap_or_default();
            days.push(CalendarDay {
                date,
                week,
                column,
                status,
            });
        }
        Ok(days)
    }

    pub async fn list_homestays(&self, host_id: Option<&str>) -> Vec<HomestayInfo> {
        let listings: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in listings {
            let guard = rs.read().await;
            let Some(host) = guard.host_id() else {
                continue;
            };
            if host_id.is_some_and(|h| h != host) {
                continue;
            }
            out.push(HomestayInfo {
                id: guard.id,
                host_id: host.to_string(),
                name: guard.name.clone(),
                rooms: self.children.get(&guard.id).map_or(0, |k| k.len()),
            });
        }
        out.sort_by_key(|h| h.id);
        out
    }

    pub async fn list_rooms(&self, homestay_id: Option<Ulid>) -> Vec<RoomInfo> {
        let room_ids: Vec<Ulid> = match homestay_id {
            Some(hid) => self.children.get(&hid).map(|k| k.value().clone()).unwrap_or_default(),
            None => self.children.iter().flat_map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::with_capacity(room_ids.len());
        for rid in room_ids {
            if let Some(rs) = self.get_listing(&rid) {
                out.push(room_info(&*rs.read().await));
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_rules(&self, listing_id: Ulid) -> Result<Vec<RuleInfo>, EngineError> {
        let Some(rs) = self.get_listing(&listing_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter(|i| i.is_rule())
            .map(|i| RuleInfo {
                id: i.id,
                listing_id,
                start: i.span.start,
                end: i.span.end,
                blocking: matches!(i.kind, IntervalKind::Blackout),
            })
            .collect())
    }

    pub async fn get_holds(&self, room_id: Ulid) -> Result<Vec<HoldInfo>, EngineError> {
        let Some(rs) = self.get_listing(&room_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| match &i.kind {
                IntervalKind::Hold { expires_at, stay } => Some(HoldInfo {
                    id: i.id,
                    room_id,
                    start: i.span.start,
                    end: i.span.end,
                    expires_at: *expires_at,
                    stay: stay.clone(),
                }),
                _ => None,
            })
            .collect())
    }

    pub async fn list_bookings(&self, filter: BookingFilter) -> Vec<BookingInfo> {
        let room_ids: Vec<Ulid> = match &filter {
            BookingFilter::Room(id) => vec![*id],
            BookingFilter::Homestay(hid) => self.children.get(hid).map(|k| k.value().clone()).unwrap_or_default(),
            BookingFilter::Host(host) => {
                let homestays: Vec<Ulid> = self
                    .list_homestays(Some(host))
                    .await
                    .into_iter()
                    .map(|h| h.id)
                    .collect();
                homestays
                    .iter()
                    .flat_map(|hid| self.children.get(hid).map(|k| k.value().clone()).unwrap_or_default())
                    .collect()
            }
            BookingFilter::All => self.children.iter().flat_map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_listing(&rid) else {
                continue;
            };
            let guard = rs.read().await;
            let homestay_id = guard.parent_id.unwrap_or(guard.id);
            out.extend(guard.intervals.iter().filter_map(|i| match &i.kind {
                IntervalKind::Booking { stay, payment_ref } => Some(BookingInfo {
                    id: i.id,
                    room_id: rid,
                    homestay_id,
                    start: i.span.start,
                    end: i.span.end,
                    stay: stay.clone(),
                    payment_ref: payment_ref.clone(),
                }),
                _ => None,
            }));
        }
        out.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        out
    }
}

pub(super) fn room_info(rs: &ListingState) -> RoomInfo {
    let (price_per_night, max_guests) = match rs.kind {
        ListingKind::Room {
            price_per_night,
            max_guests,
        } => (price_per_night, max_guests),
        ListingKind::Homestay { .. } => (0, 0),
    };
    RoomInfo {
        id: rs.id,
        homestay_id: rs.parent_id.unwrap_or(rs.id),
        name: rs.name.clone(),
        price_per_night,
        max_guests,
        units: rs.units,
        turnover: rs.turnover,
    }
}
