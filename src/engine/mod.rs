mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod reports;
mod settings;
#[cfg(test)]
mod tests;
mod vouchers;

pub use availability::{
    availability, booked_saturation, compute_saturated_spans, covers, merge_overlapping, open_by_rules,
    subtract_intervals, InheritedRules,
};
pub use conflict::now_ms;
pub use error::EngineError;
pub use mutations::{BatchBooking, Confirmation, StayRequest};
pub use queries::BookingFilter;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedListing = Arc<RwLock<ListingState>>;
pub type SharedVoucher = Arc<Mutex<VoucherState>>;

/// A voucher and the allocations currently counted against its usage limit.
#[derive(Debug, Clone)]
pub struct VoucherState {
    pub voucher: Voucher,
    pub redemptions: HashSet<Ulid>,
}

impl VoucherState {
    pub fn new(voucher: Voucher) -> Self {
        Self {
            voucher,
            redemptions: HashSet::new(),
        }
    }

    pub fn used(&self) -> u32 {
        self.redemptions.len() as u32
    }

    fn apply(&mut self, change: &Redemption) {
        if change.code != self.voucher.code {
            return;
        }
        if change.redeemed {
            self.redemptions.insert(change.allocation);
        } else {
            self.redemptions.remove(&change.allocation);
        }
    }
}

/// A voucher use gained or given back by applying an allocation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Redemption {
    pub code: String,
    pub allocation: Ulid,
    pub redeemed: bool,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before a compaction or counter read.
                            commit_batch(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Queue every event, fsync once, answer everyone. An event that fails to
/// encode fails alone; a failed flush fails the whole group and the ledger
/// rolls back to where it stood before it.
fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut queued = Vec::with_capacity(batch.len());
    for (event, tx) in batch.drain(..) {
        match wal.append_buffered(&event) {
            Ok(()) => queued.push(tx),
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
    }
    let result = if queued.is_empty() { Ok(()) } else { wal.flush_sync() };

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for tx in queued {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let before = wal.size();
            let result = wal.rewrite(&events);
            if result.is_ok() {
                tracing::debug!("ledger rewritten: {before} -> {} bytes", wal.size());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {
            tracing::error!("append routed to non-append handler; dropping");
        }
    }
}

/// One tenant's marketplace: listings, vouchers, settings, and the WAL writer.
///
/// Lock order, outermost first: `catalog`, then listings (rooms in id order,
/// then homestays in id order), then vouchers. `settings` is only
/// ever read into a snapshot before any listing lock is taken.
pub struct Engine {
    pub state: DashMap<Ulid, SharedListing>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: entity (rule/hold/booking) id → listing id.
    pub(super) entity_to_listing: DashMap<Ulid, Ulid>,
    /// Homestay → rooms.
    pub(super) children: DashMap<Ulid, Vec<Ulid>>,
    pub(super) vouchers: DashMap<String, SharedVoucher>,
    /// Payment reference → the booking it confirmed.
    pub(super) payments: DashMap<String, Ulid>,
    pub(super) settings: RwLock<PlatformSettings>,
    /// Serialises listing and voucher creation/deletion.
    pub(super) catalog: Mutex<()>,
}

/// Apply an event directly to a ListingState (no locking, caller holds the lock).
/// Returns the voucher redemption the event gains or gives back, if any.
fn apply_to_listing(
    rs: &mut ListingState,
    event: &Event,
    entities: &DashMap<Ulid, Ulid>,
    payments: &DashMap<String, Ulid>,
) -> Option<Redemption> {
    match event {
        Event::RuleAdded {
            id,
            listing_id,
            span,
            blocking,
        } => {
            let kind = if *blocking {
                IntervalKind::Blackout
            } else {
                IntervalKind::Open
            };
            rs.insert_interval(Interval { id: *id, span: *span, kind });
            entities.insert(*id, *listing_id);
            None
        }
        Event::RuleRemoved { id, .. } => {
            rs.remove_interval(*id);
            entities.remove(id);
            None
        }
        Event::HoldPlaced {
            id,
            room_id,
            span,
            expires_at,
            stay,
        } => {
            rs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Hold {
                    expires_at: *expires_at,
                    stay: stay.clone(),
                },
            });
            entities.insert(*id, *room_id);
            redeemed(stay, *id)
        }
        Event::HoldConfirmed { id, payment_ref, .. } => {
            if let Some(interval) = rs.intervals.iter_mut().find(|i| i.id == *id) {
                let kind = std::mem::replace(&mut interval.kind, IntervalKind::Open);
                interval.kind = match kind {
                    IntervalKind::Hold { stay, .. } => IntervalKind::Booking {
                        stay,
                        payment_ref: Some(payment_ref.clone()),
                    },
                    other => other,
                };
                payments.insert(payment_ref.clone(), *id);
            }
            None
        }
        Event::BookingConfirmed {
            id,
            room_id,
            span,
            stay,
            payment_ref,
        } => {
            rs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Booking {
                    stay: stay.clone(),
                    payment_ref: payment_ref.clone(),
                },
            });
            entities.insert(*id, *room_id);
            if let Some(r) = payment_ref {
                payments.insert(r.clone(), *id);
            }
            redeemed(stay, *id)
        }
        Event::HoldReleased { id, .. } | Event::BookingCancelled { id, .. } => {
            entities.remove(id);
            let removed = rs.remove_interval(*id)?;
            if let IntervalKind::Booking {
                payment_ref: Some(r),
                ..
            } = &removed.kind
            {
                payments.remove_if(r, |_, booking| booking == id);
            }
            removed.stay().and_then(|stay| {
                stay.quote.voucher.clone().map(|code| Redemption {
                    code,
                    allocation: *id,
                    redeemed: false,
                })
            })
        }
        Event::RoomUpdated { spec, .. } => {
            rs.name = spec.name.clone();
            rs.kind = ListingKind::Room {
                price_per_night: spec.price_per_night,
                max_guests: spec.max_guests,
            };
            rs.units = spec.units;
            rs.turnover = spec.turnover;
            None
        }
        // Listing, voucher, and settings lifecycles are handled at the engine
        // level; a multi-room booking is applied row by row.
        Event::HomestayCreated { .. }
        | Event::BookingsConfirmed { .. }
        | Event::RoomCreated { .. }
        | Event::ListingDeleted { .. }
        | Event::VoucherCreated { .. }
        | Event::VoucherDeleted { .. }
        | Event::SettingsUpdated { .. } => None,
    }
}

fn redeemed(stay: &Stay, allocation: Ulid) -> Option<Redemption> {
    stay.quote.voucher.clone().map(|code| Redemption {
        code,
        allocation,
        redeemed: true,
    })
}

fn replay_error(what: &str) -> io::Error {
    io::Error::other(format!("replay: {what} lock contended"))
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut engine = Self {
            state: DashMap::new(),
            wal_tx,
            entity_to_listing: DashMap::new(),
            children: DashMap::new(),
            vouchers: DashMap::new(),
            payments: DashMap::new(),
            settings: RwLock::new(PlatformSettings::default()),
            catalog: Mutex::new(()),
        };

        // We own every Arc here, so try_read/try_write/try_lock never contend.
        // Never block: this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::HomestayCreated { id, host_id, name } => {
                    let rs = ListingState::homestay(*id, host_id.clone(), name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::RoomCreated { id, homestay_id, spec } => {
                    let rs = ListingState::room(*id, *homestay_id, spec.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                    engine.children.entry(*homestay_id).or_default().push(*id);
                }
                Event::ListingDeleted { id } => {
                    if let Some((_, rs)) = engine.state.remove(id) {
                        let guard = rs.try_read().map_err(|_| replay_error("listing"))?;
                        engine.forget_listing(&guard);
                    }
                }
                Event::VoucherCreated { voucher, redemptions } => {
                    let mut vs = VoucherState::new(voucher.clone());
                    vs.redemptions.extend(redemptions.iter().copied());
                    engine
                        .vouchers
                        .insert(voucher.code.clone(), Arc::new(Mutex::new(vs)));
                }
                Event::VoucherDeleted { code } => {
                    engine.vouchers.remove(code);
                }
                Event::SettingsUpdated { settings } => {
                    *engine.settings.get_mut() = settings.clone();
                }
                Event::BookingsConfirmed { bookings } => {
                    for row in bookings {
                        engine.replay_on_listing(&row.clone().into_event())?;
                    }
                }
                other => engine.replay_on_listing(other)?,
            }
        }

        Ok(engine)
    }

    fn replay_on_listing(&self, event: &Event) -> io::Result<()> {
        let Some(listing_id) = event_listing_id(event) else {
            return Ok(());
        };
        let Some(rs) = self.get_listing(&listing_id) else {
            return Ok(());
        };
        let mut guard = rs.try_write().map_err(|_| replay_error("listing"))?;
        let change = apply_to_listing(&mut guard, event, &self.entity_to_listing, &self.payments);
        if let Some(change) = change
            && let Some(voucher) = self.get_voucher(&change.code)
        {
            let mut vs = voucher.try_lock().map_err(|_| replay_error("voucher"))?;
            vs.apply(&change);
        }
        Ok(())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_listing(&self, id: &Ulid) -> Option<SharedListing> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_listing_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_listing.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn get_voucher(&self, code: &str) -> Option<SharedVoucher> {
        self.vouchers.get(code).map(|e| e.value().clone())
    }

    /// WAL-append, then apply to the listing and to the voucher it redeems or
    /// returns. The caller holds the listing lock and, when the event carries a
    /// voucher code, that voucher's lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ListingState,
        event: &Event,
        voucher: Option<&mut VoucherState>,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let change = apply_to_listing(rs, event, &self.entity_to_listing, &self.payments);
        if let (Some(change), Some(vs)) = (change, voucher) {
            vs.apply(&change);
            if change.redeemed {
                metrics::counter!(crate::observability::VOUCHER_REDEMPTIONS_TOTAL).increment(1);
            }
        }
        Ok(())
    }

    /// Lookup entity → listing, get listing, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ListingState>), EngineError> {
        let listing_id = self
            .get_listing_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_listing(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let guard = rs.write_owned().await;
        Ok((listing_id, guard))
    }

    /// Drop the indexes that point into a deleted listing. Voucher redemptions
    /// stay: past stays keep counting against their voucher.
    pub(super) fn forget_listing(&self, rs: &ListingState) {
        for interval in &rs.intervals {
            self.entity_to_listing.remove(&interval.id);
            if let IntervalKind::Booking {
                payment_ref: Some(r),
                ..
            } = &interval.kind
            {
                self.payments.remove_if(r, |_, booking| *booking == interval.id);
            }
        }
        if let Some(pid) = rs.parent_id
            && let Some(mut kids) = self.children.get_mut(&pid)
        {
            kids.retain(|c| *c != rs.id);
        }
        self.children.remove(&rs.id);
    }
}

/// Extract the listing id from an event that mutates one listing.
fn event_listing_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RuleAdded { listing_id, .. } | Event::RuleRemoved { listing_id, .. } => Some(*listing_id),
        Event::HoldPlaced { room_id, .. }
        | Event::HoldReleased { room_id, .. }
        | Event::HoldConfirmed { room_id, .. }
        | Event::BookingConfirmed { room_id, .. }
        | Event::BookingCancelled { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::HomestayCreated { .. }
        | Event::BookingsConfirmed { .. }
        | Event::RoomCreated { .. }
        | Event::ListingDeleted { .. }
        | Event::VoucherCreated { .. }
        | Event::VoucherDeleted { .. }
        | Event::SettingsUpdated { .. } => None,
    }
}
