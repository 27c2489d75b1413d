use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, OwnedMutexGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing::{self, VoucherUse};

use super::conflict::{check_guests, check_no_conflict_with, check_open, now_ms, room_terms, validate_span};
use super::{apply_to_listing, Engine, EngineError, VoucherState, WalCommand};

/// Who is staying, and the voucher they want to redeem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayRequest {
    pub guest: String,
    pub guests: u32,
    pub voucher: Option<String>,
}

/// One row of a multi-room booking. Batches never carry vouchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchBooking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub guest: String,
    pub guests: u32,
    pub payment_ref: Option<String>,
}

/// Outcome of a payment confirmation. Both carry the room id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(Ulid),
    /// The same payment already confirmed this hold; nothing changed.
    AlreadyConfirmed(Ulid),
}

fn check_guest_name(guest: &str) -> Result<(), EngineError> {
    if guest.trim().is_empty() {
        return Err(EngineError::InvalidArgument("guest name is required".into()));
    }
    if guest.len() > MAX_GUEST_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    Ok(())
}

fn check_payment_ref(payment_ref: &str) -> Result<(), EngineError> {
    if payment_ref.is_empty() {
        return Err(EngineError::InvalidArgument("payment reference is required".into()));
    }
    if payment_ref.len() > MAX_PAYMENT_REF_LEN {
        return Err(EngineError::LimitExceeded("payment reference too long"));
    }
    Ok(())
}

pub(super) fn check_room_spec(spec: &RoomSpec) -> Result<(), EngineError> {
    if let Some(ref n) = spec.name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if spec.price_per_night <= 0 {
        return Err(EngineError::InvalidArgument("price_per_night must be positive".into()));
    }
    if spec.max_guests == 0 || spec.max_guests > MAX_GUESTS_PER_ROOM {
        return Err(EngineError::InvalidArgument(format!(
            "max_guests must be between 1 and {MAX_GUESTS_PER_ROOM}"
        )));
    }
    if spec.units == 0 || spec.units > MAX_UNITS_PER_ROOM {
        return Err(EngineError::InvalidArgument(format!(
            "units must be between 1 and {MAX_UNITS_PER_ROOM}"
        )));
    }
    if spec.turnover.is_some_and(|t| !(0..DAY_MS).contains(&t)) {
        return Err(EngineError::InvalidArgument("turnover must be under one day".into()));
    }
    Ok(())
}

impl Engine {
    pub async fn create_homestay(&self, id: Ulid, host_id: String, name: Option<String>) -> Result<(), EngineError> {
        if host_id.trim().is_empty() {
            return Err(EngineError::InvalidArgument("host_id is required".into()));
        }
        if host_id.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("host id too long"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("homestay name too long"));
        }

        let _catalog = self.catalog.lock().await;
        if self.state.len() >= MAX_LISTINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many listings"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::HomestayCreated {
            id,
            host_id: host_id.clone(),
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        let rs = ListingState::homestay(id, host_id, name);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        Ok(())
    }

    pub async fn create_room(&self, id: Ulid, homestay_id: Ulid, spec: RoomSpec) -> Result<(), EngineError> {
        check_room_spec(&spec)?;

        let _catalog = self.catalog.lock().await;
        if self.state.len() >= MAX_LISTINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many listings"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let parent = self
            .get_listing(&homestay_id)
            .ok_or(EngineError::NotFound(homestay_id))?;
        if parent.read().await.is_room() {
            return Err(EngineError::NotAHomestay(homestay_id));
        }

        let event = Event::RoomCreated {
            id,
            homestay_id,
            spec: spec.clone(),
        };
        self.wal_append(&event).await?;
        let rs = ListingState::room(id, homestay_id, spec);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.children.entry(homestay_id).or_default().push(id);
        Ok(())
    }

    /// Change a room's price and capacity. Existing holds and bookings keep
    /// the quote they were made with.
    pub async fn update_room(&self, id: Ulid, spec: RoomSpec) -> Result<(), EngineError> {
        check_room_spec(&spec)?;
        let rs = self.get_listing(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !guard.is_room() {
            return Err(EngineError::NotARoom(id));
        }

        let event = Event::RoomUpdated { id, spec };
        self.persist_and_apply(&mut guard, &event, None).await
    }

    pub async fn delete_listing(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let rs = self.get_listing(&id).ok_or(EngineError::NotFound(id))?;
        if let Some(kids) = self.children.get(&id)
            && !kids.is_empty()
        {
            return Err(EngineError::HasChildren(id));
        }

        let guard = rs.write().await;
        let now = now_ms();
        let upcoming = guard
            .intervals
            .iter()
            .any(|i| i.is_active_allocation(now) && i.span.end > now);
        if upcoming {
            return Err(EngineError::HasAllocations(id));
        }

        let event = Event::ListingDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.forget_listing(&guard);
        info!("deleted listing {id}");
        Ok(())
    }

    pub async fn add_rule(&self, id: Ulid, listing_id: Ulid, start: Ms, end: Ms, blocking: bool) -> Result<(), EngineError> {
        let span = validate_span(start, end)?;
        if self.entity_to_listing.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_listing(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let mut guard = rs.write().await;
        if guard.intervals.len() >= MAX_INTERVALS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many intervals on listing"));
        }

        let event = Event::RuleAdded {
            id,
            listing_id,
            span,
            blocking,
        };
        self.persist_and_apply(&mut guard, &event, None).await
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (listing_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.get_interval(&id).is_some_and(|i| i.is_rule()) {
            return Err(EngineError::InvalidArgument(format!("{id} is not a rule")));
        }
        let event = Event::RuleRemoved { id, listing_id };
        self.persist_and_apply(&mut guard, &event, None).await?;
        Ok(listing_id)
    }

    /// Validate a stay on a locked room and freeze its quote. When the stay
    /// redeems a voucher, the voucher comes back locked so the redemption
    /// commits with the allocation.
    async fn prepare_stay(
        &self,
        rs: &ListingState,
        span: &Span,
        req: &StayRequest,
        settings: &PlatformSettings,
        now: Ms,
    ) -> Result<(Quote, Option<OwnedMutexGuard<VoucherState>>), EngineError> {
        if rs.intervals.len() >= MAX_INTERVALS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many intervals on listing"));
        }
        let (rate, _) = room_terms(rs)?;
        check_guests(rs, req.guests)?;

        let inherited = self.collect_inherited_rules(rs, span).await?;
        check_open(rs, span, &inherited)?;
        check_no_conflict_with(rs, span, now, &[])?;

        match &req.voucher {
            Some(code) => {
                let vs = self.lock_voucher(code).await?;
                let quote = pricing::quote(
                    rate,
                    span,
                    settings,
                    Some(VoucherUse {
                        voucher: &vs.voucher,
                        used: vs.used(),
                    }),
                    now,
                )?;
                Ok((quote, Some(vs)))
            }
            None => Ok((pricing::quote(rate, span, settings, None, now)?, None)),
        }
    }

    pub async fn place_hold(
        &self,
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        req: StayRequest,
        expires_at: Option<Ms>,
    ) -> Result<Quote, EngineError> {
        let span = validate_span(start, end)?;
        check_guest_name(&req.guest)?;
        let settings = self.settings.read().await.clone();
        let now = now_ms();
        let expires_at = expires_at.unwrap_or(now + settings.hold_ttl_ms);
        if expires_at <= now {
            return Err(EngineError::InvalidArgument("hold would already be expired".into()));
        }
        if self.entity_to_listing.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self.get_listing(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let (quote, mut voucher) = self.prepare_stay(&guard, &span, &req, &settings, now).await?;

        let event = Event::HoldPlaced {
            id,
            room_id,
            span,
            expires_at,
            stay: Stay {
                guest: req.guest,
                guests: req.guests,
                quote: quote.clone(),
            },
        };
        self.persist_and_apply(&mut guard, &event, voucher.as_deref_mut())
            .await?;
        Ok(quote)
    }

    /// Remove an allocation under its room lock, giving its voucher use back.
    async fn remove_allocation(
        &self,
        id: Ulid,
        room_id: Ulid,
        guard: &mut ListingState,
        event: Event,
    ) -> Result<(), EngineError> {
        let code = guard
            .get_interval(&id)
            .and_then(|i| i.stay())
            .and_then(|s| s.quote.voucher.clone());
        let mut voucher = match code {
            Some(code) => match self.get_voucher(&code) {
                Some(v) => Some(v.lock_owned().await),
                // Voucher deleted since; nothing to give back.
                None => None,
            },
            None => None,
        };
        self.persist_and_apply(guard, &event, voucher.as_deref_mut()).await?;
        tracing::debug!("removed allocation {id} from room {room_id}");
        Ok(())
    }

    pub async fn release_hold(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !matches!(
            guard.get_interval(&id).map(|i| &i.kind),
            Some(IntervalKind::Hold { .. })
        ) {
            return Err(EngineError::NotAHold(id));
        }
        let event = Event::HoldReleased { id, room_id };
        self.remove_allocation(id, room_id, &mut guard, event).await?;
        Ok(room_id)
    }

    /// Payment webhook entry point. Safe to call again with the same payment.
    pub async fn confirm_hold(&self, hold_id: Ulid, payment_ref: String) -> Result<Confirmation, EngineError> {
        check_payment_ref(&payment_ref)?;
        let (room_id, mut guard) = self.resolve_entity_write(&hold_id).await?;

        if let Some(booking) = self.payments.get(&payment_ref).map(|e| *e.value()) {
            if booking == hold_id {
                return Ok(Confirmation::AlreadyConfirmed(room_id));
            }
            return Err(EngineError::PaymentReused { payment_ref, booking });
        }

        let now = now_ms();
        match guard.get_interval(&hold_id).map(|i| &i.kind) {
            Some(IntervalKind::Hold { expires_at, .. }) if *expires_at <= now => {
                return Err(EngineError::HoldExpired(hold_id));
            }
            Some(IntervalKind::Hold { .. }) => {}
            _ => return Err(EngineError::NotAHold(hold_id)),
        }

        // Claim the reference before the WAL write; another room may race us for it.
        match self.payments.entry(payment_ref.clone()) {
            Entry::Occupied(e) => {
                let booking = *e.get();
                drop(e);
                return Err(EngineError::PaymentReused { payment_ref, booking });
            }
            Entry::Vacant(e) => {
                e.insert(hold_id);
            }
        }

        let event = Event::HoldConfirmed {
            id: hold_id,
            room_id,
            payment_ref: payment_ref.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event, None).await {
            self.payments.remove(&payment_ref);
            return Err(e);
        }
        info!("confirmed hold {hold_id} on room {room_id} with payment {payment_ref}");
        Ok(Confirmation::Confirmed(room_id))
    }

    /// Book directly, without a hold.
    pub async fn confirm_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        req: StayRequest,
        payment_ref: Option<String>,
    ) -> Result<Quote, EngineError> {
        let span = validate_span(start, end)?;
        check_guest_name(&req.guest)?;
        if let Some(ref r) = payment_ref {
            check_payment_ref(r)?;
        }
        let settings = self.settings.read().await.clone();
        if self.entity_to_listing.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let rs = self.get_listing(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let now = now_ms();
        let (quote, mut voucher) = self.prepare_stay(&guard, &span, &req, &settings, now).await?;

        if let Some(ref r) = payment_ref {
            match self.payments.entry(r.clone()) {
                Entry::Occupied(e) => {
                    let booking = *e.get();
                    drop(e);
                    return Err(EngineError::PaymentReused {
                        payment_ref: r.clone(),
                        booking,
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(id);
                }
            }
        }

        let event = Event::BookingConfirmed {
            id,
            room_id,
            span,
            stay: Stay {
                guest: req.guest,
                guests: req.guests,
                quote: quote.clone(),
            },
            payment_ref: payment_ref.clone(),
        };
        if let Err(e) = self
            .persist_and_apply(&mut guard, &event, voucher.as_deref_mut())
            .await
        {
            if let Some(r) = payment_ref {
                self.payments.remove(&r);
            }
            return Err(e);
        }
        Ok(quote)
    }

    /// Atomically book several stays, possibly across rooms. All-or-nothing:
    /// if any row is rejected, none are committed.
    pub async fn batch_confirm_bookings(&self, bookings: Vec<BatchBooking>) -> Result<(), EngineError> {
        if bookings.is_empty() {
            return Ok(());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut spans = Vec::with_capacity(bookings.len());
        let mut ids = HashSet::new();
        let mut refs = HashSet::new();
        for b in &bookings {
            spans.push(validate_span(b.start, b.end)?);
            check_guest_name(&b.guest)?;
            if !ids.insert(b.id) || self.entity_to_listing.contains_key(&b.id) {
                return Err(EngineError::AlreadyExists(b.id));
            }
            if let Some(ref r) = b.payment_ref {
                check_payment_ref(r)?;
                if !refs.insert(r.clone()) {
                    return Err(EngineError::InvalidArgument(format!(
                        "payment reference {r} appears twice in batch"
                    )));
                }
            }
        }
        let settings = self.settings.read().await.clone();

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = bookings.iter().map(|b| b.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut rs_map = HashMap::new();
        for rid in &room_ids {
            let rs = self.get_listing(rid).ok_or(EngineError::NotFound(*rid))?;
            let guard = rs.write_owned().await;
            rs_map.insert(*rid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate every row against current state and earlier rows.
        let now = now_ms();
        let mut pending: HashMap<Ulid, Vec<(Ulid, Span)>> = HashMap::new();
        let mut quotes = Vec::with_capacity(bookings.len());
        for (b, span) in bookings.iter().zip(&spans) {
            let guard = &guards[rs_map[&b.room_id]];
            if guard.intervals.len() >= MAX_INTERVALS_PER_LISTING {
                return Err(EngineError::LimitExceeded("too many intervals on listing"));
            }
            let (rate, _) = room_terms(guard)?;
            check_guests(guard, b.guests)?;
            let inherited = self.collect_inherited_rules(guard, span).await?;
            check_open(guard, span, &inherited)?;
            let earlier = pending.entry(b.room_id).or_default();
            check_no_conflict_with(guard, span, now, &earlier[..])?;
            earlier.push((b.id, *span));
            quotes.push(pricing::quote(rate, span, &settings, None, now)?);
        }

        let mut claimed: Vec<String> = Vec::new();
        for r in &refs {
            match self.payments.entry(r.clone()) {
                Entry::Occupied(e) => {
                    let booking = *e.get();
                    drop(e);
                    for c in &claimed {
                        self.payments.remove(c);
                    }
                    return Err(EngineError::PaymentReused {
                        payment_ref: r.clone(),
                        booking,
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(Ulid::nil());
                    claimed.push(r.clone());
                }
            }
        }

        // Phase 2: one record for the whole batch, applied once it is durable.
        let rows: Vec<BookedStay> = bookings
            .into_iter()
            .zip(spans)
            .zip(quotes)
            .map(|((b, span), quote)| BookedStay {
                id: b.id,
                room_id: b.room_id,
                span,
                stay: Stay {
                    guest: b.guest,
                    guests: b.guests,
                    quote,
                },
                payment_ref: b.payment_ref,
            })
            .collect();
        let event = Event::BookingsConfirmed { bookings: rows.clone() };
        if let Err(e) = self.wal_append(&event).await {
            for c in &claimed {
                self.payments.remove_if(c, |_, booking| booking.is_nil());
            }
            return Err(e);
        }
        for row in rows {
            let guard_idx = rs_map[&row.room_id];
            let event = row.into_event();
            apply_to_listing(&mut guards[guard_idx], &event, &self.entity_to_listing, &self.payments);
        }

        Ok(())
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !matches!(
            guard.get_interval(&id).map(|i| &i.kind),
            Some(IntervalKind::Booking { .. })
        ) {
            return Err(EngineError::InvalidArgument(format!("{id} is not a booking")));
        }
        let event = Event::BookingCancelled { id, room_id };
        self.remove_allocation(id, room_id, &mut guard, event).await?;
        info!("cancelled booking {id} on room {room_id}");
        Ok(room_id)
    }

    pub fn collect_expired_holds(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for interval in &guard.intervals {
                    if let IntervalKind::Hold { expires_at, .. } = interval.kind
                        && expires_at <= now
                    {
                        expired.push((interval.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state. Holds every lock while it snapshots so no
    /// acknowledged write lands between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;

        // Rooms before homestays: stay validation holds a room while it
        // reads the homestay's rules.
        let rooms: HashSet<Ulid> = self.children.iter().flat_map(|e| e.value().clone()).collect();
        let mut listing_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        listing_ids.sort_by_key(|id| (!rooms.contains(id), *id));
        let mut guards = Vec::with_capacity(listing_ids.len());
        for id in &listing_ids {
            if let Some(rs) = self.get_listing(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut codes: Vec<String> = self.vouchers.iter().map(|e| e.key().clone()).collect();
        codes.sort();
        let mut voucher_guards = Vec::with_capacity(codes.len());
        for code in &codes {
            if let Some(v) = self.get_voucher(code) {
                voucher_guards.push(v.lock_owned().await);
            }
        }
        let settings = self.settings.read().await.clone();

        let mut events = vec![Event::SettingsUpdated { settings }];
        // Homestays before the rooms that reference them.
        for guard in guards.iter().filter(|g| !g.is_room()) {
            events.push(Event::HomestayCreated {
                id: guard.id,
                host_id: guard.host_id().unwrap_or_default().to_string(),
                name: guard.name.clone(),
            });
            emit_intervals(guard, &mut events);
        }
        for guard in guards.iter().filter(|g| g.is_room()) {
            let ListingKind::Room {
                price_per_night,
                max_guests,
            } = guard.kind
            else {
                continue;
            };
            let Some(homestay_id) = guard.parent_id else {
                continue;
            };
            events.push(Event::RoomCreated {
                id: guard.id,
                homestay_id,
                spec: RoomSpec {
                    name: guard.name.clone(),
                    price_per_night,
                    max_guests,
                    units: guard.units,
                    turnover: guard.turnover,
                },
            });
            emit_intervals(guard, &mut events);
        }
        // Vouchers last, carrying their redemptions; allocations replayed
        // before a voucher exists don't touch it.
        for vs in &voucher_guards {
            let mut redemptions: Vec<Ulid> = vs.redemptions.iter().copied().collect();
            redemptions.sort();
            events.push(Event::VoucherCreated {
                voucher: vs.voucher.clone(),
                redemptions,
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn emit_intervals(rs: &ListingState, events: &mut Vec<Event>) {
    for interval in &rs.intervals {
        match &interval.kind {
            IntervalKind::Open | IntervalKind::Blackout => events.push(Event::RuleAdded {
                id: interval.id,
                listing_id: rs.id,
                span: interval.span,
                blocking: matches!(interval.kind, IntervalKind::Blackout),
            }),
            IntervalKind::Hold { expires_at, stay } => events.push(Event::HoldPlaced {
                id: interval.id,
                room_id: rs.id,
                span: interval.span,
                expires_at: *expires_at,
                stay: stay.clone(),
            }),
            IntervalKind::Booking { stay, payment_ref } => events.push(Event::BookingConfirmed {
                id: interval.id,
                room_id: rs.id,
                span: interval.span,
                stay: stay.clone(),
                payment_ref: payment_ref.clone(),
            }),
        }
    }
}
