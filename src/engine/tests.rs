use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::conflict::now_ms;
use super::*;
use crate::pricing::PricingError;

const D: Ms = DAY_MS;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("staybook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Midnight UTC, a month from now.
fn base() -> Ms {
    (now_ms() / D + 30) * D
}

fn night(n: i64) -> Ms {
    base() + n * D
}

fn spec(price: Money, max_guests: u32) -> RoomSpec {
    RoomSpec {
        name: Some("Garden room".into()),
        price_per_night: price,
        max_guests,
        units: 1,
        turnover: None,
    }
}

fn guest(name: &str) -> StayRequest {
    StayRequest {
        guest: name.into(),
        guests: 2,
        voucher: None,
    }
}

fn with_voucher(name: &str, code: &str) -> StayRequest {
    StayRequest {
        voucher: Some(code.into()),
        ..guest(name)
    }
}

fn voucher(code: &str, kind: DiscountKind, usage_limit: Option<u32>) -> Voucher {
    Voucher {
        code: code.into(),
        kind,
        usage_limit,
        expires_at: now_ms() + 365 * D,
        min_subtotal: 0,
    }
}

/// A homestay with one room at 100.00 a night.
async fn setup(name: &str) -> (Engine, Ulid, Ulid) {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let homestay = Ulid::new();
    let room = Ulid::new();
    engine
        .create_homestay(homestay, "host-1".into(), Some("Hillside".into()))
        .await
        .unwrap();
    engine.create_room(room, homestay, spec(10_000, 2)).await.unwrap();
    (engine, homestay, room)
}

async fn voucher_used(engine: &Engine, code: &str) -> u32 {
    engine
        .list_vouchers()
        .await
        .into_iter()
        .find(|v| v.voucher.code == code)
        .map(|v| v.used)
        .unwrap()
}

/// Swap the engine's ledger writer for one that refuses every write.
fn fail_ledger_writes(engine: &mut Engine) {
    let (tx, mut rx) = mpsc::channel(16);
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WalCommand::Append { response, .. } | WalCommand::Compact { response, .. } => {
                    let _ = response.send(Err(io::Error::other("no space left on device")));
                }
                WalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(0);
                }
            }
        }
    });
    engine.wal_tx = tx;
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn create_and_list_listings() {
    let (engine, homestay, room) = setup("listings.wal").await;

    let homestays = engine.list_homestays(Some("host-1")).await;
    assert_eq!(homestays.len(), 1);
    assert_eq!(homestays[0].id, homestay);
    assert_eq!(homestays[0].rooms, 1);
    assert!(engine.list_homestays(Some("host-2")).await.is_empty());

    let rooms = engine.list_rooms(Some(homestay)).await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room);
    assert_eq!(rooms[0].price_per_night, 10_000);
}

#[tokio::test]
async fn room_needs_a_homestay_parent() {
    let (engine, _, room) = setup("room_parent.wal").await;

    let missing = Ulid::new();
    assert!(matches!(
        engine.create_room(Ulid::new(), missing, spec(5_000, 1)).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        engine.create_room(Ulid::new(), room, spec(5_000, 1)).await,
        Err(EngineError::NotAHomestay(_))
    ));
}

#[tokio::test]
async fn duplicate_and_invalid_rooms_rejected() {
    let (engine, homestay, room) = setup("room_invalid.wal").await;

    assert!(matches!(
        engine.create_room(room, homestay, spec(5_000, 1)).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(
        engine.create_room(Ulid::new(), homestay, spec(0, 1)).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.create_room(Ulid::new(), homestay, spec(5_000, 0)).await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn delete_guards_children_and_upcoming_stays() {
    let (engine, homestay, room) = setup("delete_guards.wal").await;
    let booking = Ulid::new();
    engine
        .confirm_booking(booking, room, night(1), night(3), guest("Ana"), None)
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_listing(homestay).await,
        Err(EngineError::HasChildren(_))
    ));
    assert!(matches!(
        engine.delete_listing(room).await,
        Err(EngineError::HasAllocations(_))
    ));

    engine.cancel_booking(booking).await.unwrap();
    engine.delete_listing(room).await.unwrap();
    engine.delete_listing(homestay).await.unwrap();
    assert!(engine.list_homestays(None).await.is_empty());
    assert!(engine.get_listing_for_entity(&booking).is_none());
}

#[tokio::test]
async fn update_room_only_changes_future_quotes() {
    let (engine, homestay, room) = setup("update_room.wal").await;
    let booking = Ulid::new();
    engine
        .confirm_booking(booking, room, night(1), night(2), guest("Ana"), None)
        .await
        .unwrap();

    engine.update_room(room, spec(15_000, 4)).await.unwrap();

    let quote = engine.quote_stay(room, night(5), night(6), None).await.unwrap();
    assert_eq!(quote.subtotal, 15_000);
    let bookings = engine.list_bookings(BookingFilter::Homestay(homestay)).await;
    assert_eq!(bookings[0].stay.quote.subtotal, 10_000);
    assert!(matches!(
        engine.update_room(homestay, spec(1, 1)).await,
        Err(EngineError::NotARoom(_))
    ));
}

// ── Availability and rules ───────────────────────────────

#[tokio::test]
async fn room_is_open_by_default() {
    let (engine, _, room) = setup("open_default.wal").await;
    let free = engine
        .compute_availability(room, night(0), night(7), None)
        .await
        .unwrap();
    assert_eq!(free, vec![Span::new(night(0), night(7))]);
}

#[tokio::test]
async fn homestay_blackout_closes_rooms() {
    let (engine, homestay, room) = setup("inherited_blackout.wal").await;
    engine
        .add_rule(Ulid::new(), homestay, night(2), night(4), true)
        .await
        .unwrap();

    let free = engine
        .compute_availability(room, night(0), night(7), None)
        .await
        .unwrap();
    assert_eq!(
        free,
        vec![Span::new(night(0), night(2)), Span::new(night(4), night(7))]
    );

    let result = engine
        .place_hold(Ulid::new(), room, night(1), night(3), guest("Ana"), None)
        .await;
    match result {
        Err(EngineError::Unavailable { closed, .. }) => {
            assert_eq!(closed, vec![Span::new(night(2), night(3))]);
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn room_open_rules_override_homestay_season() {
    let (engine, homestay, room) = setup("open_override.wal").await;
    engine
        .add_rule(Ulid::new(), homestay, night(0), night(10), false)
        .await
        .unwrap();
    engine
        .add_rule(Ulid::new(), room, night(20), night(25), false)
        .await
        .unwrap();

    let free = engine
        .compute_availability(room, night(0), night(30), None)
        .await
        .unwrap();
    assert_eq!(free, vec![Span::new(night(20), night(25))]);
}

#[tokio::test]
async fn remove_rule_reopens_nights() {
    let (engine, _, room) = setup("remove_rule.wal").await;
    let rule = Ulid::new();
    engine.add_rule(rule, room, night(1), night(2), true).await.unwrap();
    assert_eq!(engine.get_rules(room).await.unwrap().len(), 1);

    assert_eq!(engine.remove_rule(rule).await.unwrap(), room);
    let free = engine
        .compute_availability(room, night(0), night(3), None)
        .await
        .unwrap();
    assert_eq!(free, vec![Span::new(night(0), night(3))]);
}

#[tokio::test]
async fn min_nights_filters_short_gaps() {
    let (engine, _, room) = setup("min_nights.wal").await;
    engine
        .confirm_booking(Ulid::new(), room, night(1), night(2), guest("Ana"), None)
        .await
        .unwrap();
    let free = engine
        .compute_availability(room, night(0), night(6), Some(2))
        .await
        .unwrap();
    assert_eq!(free, vec![Span::new(night(2), night(6))]);
}

#[tokio::test]
async fn homestay_availability_counts_free_rooms() {
    let (engine, homestay, room_a) = setup("homestay_avail.wal").await;
    let room_b = Ulid::new();
    engine.create_room(room_b, homestay, spec(8_000, 2)).await.unwrap();
    engine
        .confirm_booking(Ulid::new(), room_a, night(2), night(4), guest("Ana"), None)
        .await
        .unwrap();

    let both = engine
        .compute_homestay_availability(homestay, night(0), night(6), 2, None)
        .await
        .unwrap();
    assert_eq!(
        both,
        vec![Span::new(night(0), night(2)), Span::new(night(4), night(6))]
    );

    let any = engine
        .compute_homestay_availability(homestay, night(0), night(6), 1, None)
        .await
        .unwrap();
    assert_eq!(any, vec![Span::new(night(0), night(6))]);
}

#[tokio::test]
async fn vacancies_fit_guests_and_skip_booked_rooms() {
    let (engine, homestay, small) = setup("vacancies.wal").await;
    let family = Ulid::new();
    let cheap = Ulid::new();
    engine.create_room(family, homestay, spec(20_000, 5)).await.unwrap();
    engine.create_room(cheap, homestay, spec(6_000, 4)).await.unwrap();
    engine
        .confirm_booking(Ulid::new(), cheap, night(1), night(2), guest("Ana"), None)
        .await
        .unwrap();

    let found = engine
        .search_vacancies(night(0), night(3), 3, None)
        .await
        .unwrap();
    let ids: Vec<Ulid> = found.iter().map(|v| v.room.id).collect();
    assert_eq!(ids, vec![family]);
    assert_eq!(found[0].quote.subtotal, 60_000);

    let found = engine
        .search_vacancies(night(5), night(7), 1, Some(homestay))
        .await
        .unwrap();
    let ids: Vec<Ulid> = found.iter().map(|v| v.room.id).collect();
    assert_eq!(ids, vec![cheap, small, family]);
}

// ── Holds and bookings ───────────────────────────────────

#[tokio::test]
async fn hold_freezes_quote() {
    let (engine, _, room) = setup("hold_quote.wal").await;
    let quote = engine
        .place_hold(Ulid::new(), room, night(0), night(3), guest("Ana"), None)
        .await
        .unwrap();
    assert_eq!(quote.nights, 3);
    assert_eq!(quote.subtotal, 30_000);
    assert_eq!(quote.total, 30_000);
    assert_eq!(quote.commission, 3_000);
    assert_eq!(quote.host_payout, 27_000);

    let holds = engine.get_holds(room).await.unwrap();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].stay.quote, quote);
    assert!(holds[0].expires_at > now_ms());
}

#[tokio::test]
async fn overlapping_stays_conflict() {
    let (engine, _, room) = setup("conflict.wal").await;
    let hold = Ulid::new();
    engine
        .place_hold(hold, room, night(1), night(4), guest("Ana"), None)
        .await
        .unwrap();

    let result = engine
        .confirm_booking(Ulid::new(), room, night(3), night(5), guest("Ben"), None)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == hold));

    // Check-out day is the next guest's check-in day.
    engine
        .confirm_booking(Ulid::new(), room, night(4), night(5), guest("Ben"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn multi_unit_room_sells_every_unit() {
    let (engine, homestay, _) = setup("multi_unit.wal").await;
    let dorm = Ulid::new();
    engine
        .create_room(
            dorm,
            homestay,
            RoomSpec {
                units: 2,
                ..spec(3_000, 1)
            },
        )
        .await
        .unwrap();

    let one = StayRequest { guests: 1, ..guest("Ana") };
    engine
        .place_hold(Ulid::new(), dorm, night(0), night(2), one.clone(), None)
        .await
        .unwrap();
    engine
        .place_hold(Ulid::new(), dorm, night(1), night(3), one.clone(), None)
        .await
        .unwrap();
    assert!(matches!(
        engine.place_hold(Ulid::new(), dorm, night(1), night(2), one, None).await,
        Err(EngineError::CapacityExceeded(2))
    ));
}

#[tokio::test]
async fn guest_limit_enforced() {
    let (engine, _, room) = setup("guest_limit.wal").await;
    let crowd = StayRequest { guests: 3, ..guest("Ana") };
    assert!(matches!(
        engine.place_hold(Ulid::new(), room, night(0), night(1), crowd, None).await,
        Err(EngineError::TooManyGuests { requested: 3, max: 2 })
    ));
}

#[tokio::test]
async fn release_hold_frees_nights() {
    let (engine, _, room) = setup("release_hold.wal").await;
    let hold = Ulid::new();
    engine
        .place_hold(hold, room, night(0), night(2), guest("Ana"), None)
        .await
        .unwrap();
    assert_eq!(engine.release_hold(hold).await.unwrap(), room);
    assert!(engine.get_holds(room).await.unwrap().is_empty());
    assert!(matches!(
        engine.release_hold(hold).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn wrong_allocation_kind_rejected() {
    let (engine, _, room) = setup("wrong_kind.wal").await;
    let booking = Ulid::new();
    engine
        .confirm_booking(booking, room, night(0), night(1), guest("Ana"), None)
        .await
        .unwrap();
    assert!(matches!(
        engine.release_hold(booking).await,
        Err(EngineError::NotAHold(_))
    ));
    assert!(matches!(
        engine.remove_rule(booking).await,
        Err(EngineError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn expired_hold_is_reaped_and_cannot_confirm() {
    let (engine, _, room) = setup("expired_hold.wal").await;
    let hold = Ulid::new();
    engine
        .place_hold(hold, room, night(0), night(2), guest("Ana"), Some(now_ms() + 20))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(matches!(
        engine.confirm_hold(hold, "pay_1".into()).await,
        Err(EngineError::HoldExpired(_))
    ));
    let expired = engine.collect_expired_holds(now_ms());
    assert_eq!(expired, vec![(hold, room)]);

    // Expired holds no longer block the nights.
    engine
        .confirm_booking(Ulid::new(), room, night(0), night(2), guest("Ben"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn confirm_hold_is_idempotent() {
    let (engine, homestay, room) = setup("confirm_idempotent.wal").await;
    let hold = Ulid::new();
    let quote = engine
        .place_hold(hold, room, night(0), night(2), guest("Ana"), None)
        .await
        .unwrap();

    assert_eq!(
        engine.confirm_hold(hold, "pay_1".into()).await.unwrap(),
        Confirmation::Confirmed(room)
    );
    assert_eq!(
        engine.confirm_hold(hold, "pay_1".into()).await.unwrap(),
        Confirmation::AlreadyConfirmed(room)
    );

    assert!(engine.get_holds(room).await.unwrap().is_empty());
    let bookings = engine.list_bookings(BookingFilter::Homestay(homestay)).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].id, hold);
    assert_eq!(bookings[0].stay.quote, quote);
    assert_eq!(bookings[0].payment_ref.as_deref(), Some("pay_1"));
}

#[tokio::test]
async fn payment_reference_cannot_confirm_twice() {
    let (engine, _, room) = setup("payment_reuse.wal").await;
    let first = Ulid::new();
    let second = Ulid::new();
    engine
        .place_hold(first, room, night(0), night(1), guest("Ana"), None)
        .await
        .unwrap();
    engine
        .place_hold(second, room, night(2), night(3), guest("Ben"), None)
        .await
        .unwrap();
    engine.confirm_hold(first, "pay_1".into()).await.unwrap();

    match engine.confirm_hold(second, "pay_1".into()).await {
        Err(EngineError::PaymentReused { booking, .. }) => assert_eq!(booking, first),
        other => panic!("expected PaymentReused, got {other:?}"),
    }
    assert!(matches!(
        engine
            .confirm_booking(Ulid::new(), room, night(5), night(6), guest("Cy"), Some("pay_1".into()))
            .await,
        Err(EngineError::PaymentReused { .. })
    ));
}

#[tokio::test]
async fn cancel_removes_payment_mapping() {
    let (engine, _, room) = setup("cancel_payment.wal").await;
    let booking = Ulid::new();
    engine
        .confirm_booking(booking, room, night(0), night(1), guest("Ana"), Some("pay_9".into()))
        .await
        .unwrap();
    engine.cancel_booking(booking).await.unwrap();
    assert!(!engine.payments.contains_key("pay_9"));
    assert!(matches!(
        engine.cancel_booking(booking).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let (engine, homestay, room_a) = setup("batch_atomic.wal").await;
    let room_b = Ulid::new();
    engine.create_room(room_b, homestay, spec(8_000, 2)).await.unwrap();
    let existing = Ulid::new();
    engine
        .confirm_booking(existing, room_b, night(2), night(3), guest("Ana"), None)
        .await
        .unwrap();

    let row = |room_id, start, end| BatchBooking {
        id: Ulid::new(),
        room_id,
        start,
        end,
        guest: "Group".into(),
        guests: 2,
        payment_ref: None,
    };

    let result = engine
        .batch_confirm_bookings(vec![row(room_a, night(0), night(3)), row(room_b, night(0), night(3))])
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == existing));
    assert_eq!(engine.list_bookings(BookingFilter::Room(room_a)).await.len(), 0);

    // Rows in the same batch also conflict with each other.
    let result = engine
        .batch_confirm_bookings(vec![row(room_a, night(0), night(2)), row(room_a, night(1), night(3))])
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));

    engine
        .batch_confirm_bookings(vec![row(room_a, night(4), night(6)), row(room_b, night(4), night(6))])
        .await
        .unwrap();
    assert_eq!(
        engine.list_bookings(BookingFilter::Host("host-1".into())).await.len(),
        3
    );
}

#[tokio::test]
async fn batch_ledger_failure_commits_nothing() {
    let (mut engine, homestay, room_a) = setup("batch_wal_fail.wal").await;
    let room_b = Ulid::new();
    engine.create_room(room_b, homestay, spec(8_000, 2)).await.unwrap();
    fail_ledger_writes(&mut engine);

    let rows = vec![
        BatchBooking {
            id: Ulid::new(),
            room_id: room_a,
            start: night(0),
            end: night(2),
            guest: "Group".into(),
            guests: 2,
            payment_ref: Some("pay_group".into()),
        },
        BatchBooking {
            id: Ulid::new(),
            room_id: room_b,
            start: night(0),
            end: night(2),
            guest: "Group".into(),
            guests: 2,
            payment_ref: None,
        },
    ];
    let result = engine.batch_confirm_bookings(rows).await;
    assert!(matches!(result, Err(EngineError::WalError(_))));
    assert!(engine.list_bookings(BookingFilter::All).await.is_empty());
    assert!(!engine.payments.contains_key("pay_group"));
    assert!(engine.entity_to_listing.iter().all(|e| *e.value() != room_b));
}

#[tokio::test]
async fn batch_replays_as_one_record() {
    let path = test_wal_path("batch_replay.wal");
    let (homestay, room_a, room_b) = (Ulid::new(), Ulid::new(), Ulid::new());
    let (first, second) = (Ulid::new(), Ulid::new());
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_homestay(homestay, "host-1".into(), None).await.unwrap();
        engine.create_room(room_a, homestay, spec(10_000, 2)).await.unwrap();
        engine.create_room(room_b, homestay, spec(8_000, 2)).await.unwrap();
        let appends = engine.wal_appends_since_compact().await;
        engine
            .batch_confirm_bookings(vec![
                BatchBooking {
                    id: first,
                    room_id: room_a,
                    start: night(0),
                    end: night(2),
                    guest: "Group".into(),
                    guests: 2,
                    payment_ref: Some("pay_group".into()),
                },
                BatchBooking {
                    id: second,
                    room_id: room_b,
                    start: night(0),
                    end: night(2),
                    guest: "Group".into(),
                    guests: 1,
                    payment_ref: None,
                },
            ])
            .await
            .unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, appends + 1);
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_bookings(BookingFilter::Room(room_a)).await.len(), 1);
    assert_eq!(engine.list_bookings(BookingFilter::Room(room_b)).await.len(), 1);
    assert_eq!(engine.get_listing_for_entity(&second), Some(room_b));
    assert_eq!(engine.payments.get("pay_group").map(|e| *e.value()), Some(first));
}

// ── Vouchers ─────────────────────────────────────────────

#[tokio::test]
async fn voucher_discounts_and_counts_redemptions() {
    let (engine, _, room) = setup("voucher_redeem.wal").await;
    engine
        .create_voucher(voucher("summer10", DiscountKind::Percentage { basis_points: 1_000 }, Some(1)))
        .await
        .unwrap();

    let hold = Ulid::new();
    let quote = engine
        .place_hold(hold, room, night(0), night(2), with_voucher("Ana", "SUMMER10"), None)
        .await
        .unwrap();
    assert_eq!(quote.discount, 2_000);
    assert_eq!(quote.total, 18_000);
    assert_eq!(quote.voucher.as_deref(), Some("SUMMER10"));
    assert_eq!(voucher_used(&engine, "SUMMER10").await, 1);

    let result = engine
        .place_hold(Ulid::new(), room, night(5), night(6), with_voucher("Ben", "summer10"), None)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Pricing(PricingError::VoucherExhausted(_)))
    ));

    // Releasing the hold gives the use back.
    engine.release_hold(hold).await.unwrap();
    assert_eq!(voucher_used(&engine, "SUMMER10").await, 0);
    engine
        .place_hold(Ulid::new(), room, night(5), night(6), with_voucher("Ben", "summer10"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn confirmed_hold_keeps_redemption_until_cancel() {
    let (engine, _, room) = setup("voucher_confirm.wal").await;
    engine
        .create_voucher(voucher("FLAT", DiscountKind::Fixed { amount: 2_500 }, None))
        .await
        .unwrap();
    let hold = Ulid::new();
    engine
        .place_hold(hold, room, night(0), night(1), with_voucher("Ana", "flat"), None)
        .await
        .unwrap();
    engine.confirm_hold(hold, "pay_1".into()).await.unwrap();
    assert_eq!(voucher_used(&engine, "FLAT").await, 1);

    engine.cancel_booking(hold).await.unwrap();
    assert_eq!(voucher_used(&engine, "FLAT").await, 0);
    let info = engine.list_vouchers().await;
    assert_eq!(info[0].remaining, None);
}

#[tokio::test]
async fn concurrent_redemptions_respect_usage_limit() {
    let engine = Arc::new(Engine::new(test_wal_path("voucher_race.wal")).unwrap());
    let homestay = Ulid::new();
    engine
        .create_homestay(homestay, "host-1".into(), None)
        .await
        .unwrap();
    engine
        .create_voucher(voucher("RACE", DiscountKind::Percentage { basis_points: 500 }, Some(3)))
        .await
        .unwrap();

    let mut rooms = Vec::new();
    for _ in 0..10 {
        let room = Ulid::new();
        engine.create_room(room, homestay, spec(10_000, 2)).await.unwrap();
        rooms.push(room);
    }

    let mut handles = Vec::new();
    for room in rooms {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .place_hold(Ulid::new(), room, night(0), night(1), with_voucher("Ana", "RACE"), None)
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Pricing(PricingError::VoucherExhausted(_))) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(voucher_used(&engine, "RACE").await, 3);
}

#[tokio::test]
async fn voucher_validation() {
    let (engine, _, room) = setup("voucher_validation.wal").await;
    engine
        .create_voucher(voucher("MIN", DiscountKind::Fixed { amount: 1_000 }, None))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_voucher(voucher("min", DiscountKind::Fixed { amount: 1_000 }, None))
            .await,
        Err(EngineError::VoucherExists(_))
    ));
    assert!(matches!(
        engine
            .create_voucher(voucher("BIG", DiscountKind::Percentage { basis_points: 10_001 }, None))
            .await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.quote_stay(room, night(0), night(1), Some("NOPE")).await,
        Err(EngineError::VoucherNotFound(_))
    ));

    let mut spendy = voucher("SPENDY", DiscountKind::Fixed { amount: 1_000 }, None);
    spendy.min_subtotal = 50_000;
    engine.create_voucher(spendy).await.unwrap();
    assert!(matches!(
        engine.quote_stay(room, night(0), night(2), Some("spendy")).await,
        Err(EngineError::Pricing(PricingError::BelowMinimumSpend { .. }))
    ));
    // Quoting never redeems.
    engine.quote_stay(room, night(0), night(5), Some("spendy")).await.unwrap();
    assert_eq!(voucher_used(&engine, "SPENDY").await, 0);

    engine.delete_voucher("min").await.unwrap();
    assert!(matches!(
        engine.delete_voucher("MIN").await,
        Err(EngineError::VoucherNotFound(_))
    ));
}

// ── Settings, calendar, reports ──────────────────────────

#[tokio::test]
async fn settings_apply_to_new_quotes() {
    let (engine, _, room) = setup("settings.wal").await;
    engine
        .update_settings(vec![
            ("service_fee".into(), "1500".into()),
            ("commission_bps".into(), "2000".into()),
        ])
        .await
        .unwrap();

    let quote = engine.quote_stay(room, night(0), night(1), None).await.unwrap();
    assert_eq!(quote.service_fee, 1_500);
    assert_eq!(quote.total, 11_500);
    assert_eq!(quote.commission, 2_000);

    // One bad key rejects the whole update.
    let result = engine
        .update_settings(vec![
            ("currency".into(), "EUR".into()),
            ("hold_ttl".into(), "5".into()),
        ])
        .await;
    assert!(result.is_err());
    assert_eq!(engine.settings().await.currency, "USD");
}

#[tokio::test]
async fn calendar_marks_each_night() {
    let (engine, _, room) = setup("calendar.wal").await;
    // 2030-03-01T00:00:00Z, a Friday.
    let march = 1_898_553_600_000;
    let day = |n: i64| march + (n - 1) * D;

    engine.add_rule(Ulid::new(), room, day(5), day(6), true).await.unwrap();
    engine
        .confirm_booking(Ulid::new(), room, day(10), day(12), guest("Ana"), None)
        .await
        .unwrap();
    engine
        .place_hold(Ulid::new(), room, day(20), day(21), guest("Ben"), None)
        .await
        .unwrap();

    let days = engine.room_calendar(room, 2030, 3).await.unwrap();
    assert_eq!(days.len(), 31);
    assert_eq!((days[0].week, days[0].column), (0, 4));
    let status = |n: usize| days[n - 1].status;
    assert_eq!(status(1), DayStatus::Available);
    assert_eq!(status(5), DayStatus::Closed);
    assert_eq!(status(10), DayStatus::Booked);
    assert_eq!(status(11), DayStatus::Booked);
    assert_eq!(status(12), DayStatus::Available);
    assert_eq!(status(20), DayStatus::Held);

    engine
        .update_settings(vec![("week_start".into(), "sunday".into())])
        .await
        .unwrap();
    let days = engine.room_calendar(room, 2030, 3).await.unwrap();
    assert_eq!(days[0].column, 5);

    assert!(matches!(
        engine.room_calendar(room, 2030, 13).await,
        Err(EngineError::Calendar(_))
    ));
}

#[tokio::test]
async fn calendar_outside_timestamp_range_is_rejected() {
    let (engine, _, room) = setup("calendar_range.wal").await;
    for (year, month) in [(1960, 1), (1999, 12), (1970, 1), (2200, 6)] {
        assert!(
            matches!(
                engine.room_calendar(room, year, month).await,
                Err(EngineError::LimitExceeded(_))
            ),
            "{year}-{month}"
        );
    }
    assert_eq!(engine.room_calendar(room, 2000, 1).await.unwrap().len(), 31);
}

#[tokio::test]
async fn revenue_sums_confirmed_bookings() {
    let (engine, homestay, room) = setup("revenue.wal").await;
    let other = Ulid::new();
    let other_room = Ulid::new();
    engine.create_homestay(other, "host-2".into(), None).await.unwrap();
    engine.create_room(other_room, other, spec(5_000, 2)).await.unwrap();

    engine
        .confirm_booking(Ulid::new(), room, night(0), night(2), guest("Ana"), None)
        .await
        .unwrap();
    engine
        .confirm_booking(Ulid::new(), room, night(10), night(11), guest("Ben"), None)
        .await
        .unwrap();
    // Holds are not revenue.
    engine
        .place_hold(Ulid::new(), room, night(4), night(5), guest("Cy"), None)
        .await
        .unwrap();
    engine
        .confirm_booking(Ulid::new(), other_room, night(0), night(1), guest("Di"), None)
        .await
        .unwrap();

    let rows = engine.revenue(Some("host-1"), None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].homestay_id, homestay);
    assert_eq!(rows[0].bookings, 2);
    assert_eq!(rows[0].nights, 3);
    assert_eq!(rows[0].gross, 30_000);
    assert_eq!(rows[0].commission, 3_000);
    assert_eq!(rows[0].host_payout, 27_000);

    let rows = engine
        .revenue(Some("host-1"), Some((night(0), night(5))))
        .await
        .unwrap();
    assert_eq!(rows[0].bookings, 1);
    assert_eq!(engine.revenue(None, None).await.unwrap().len(), 2);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_bookings_vouchers_and_payments() {
    let path = test_wal_path("replay_full.wal");
    let (homestay, room, hold) = (Ulid::new(), Ulid::new(), Ulid::new());
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_homestay(homestay, "host-1".into(), None).await.unwrap();
        engine.create_room(room, homestay, spec(10_000, 2)).await.unwrap();
        engine
            .create_voucher(voucher("BACK", DiscountKind::Fixed { amount: 1_000 }, Some(5)))
            .await
            .unwrap();
        engine
            .update_settings(vec![("currency".into(), "eur".into())])
            .await
            .unwrap();
        engine
            .place_hold(hold, room, night(0), night(2), with_voucher("Ana", "BACK"), None)
            .await
            .unwrap();
        engine.confirm_hold(hold, "pay_1".into()).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.settings().await.currency, "EUR");
    assert_eq!(voucher_used(&engine, "BACK").await, 1);
    let bookings = engine.list_bookings(BookingFilter::Room(room)).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].stay.quote.discount, 1_000);
    assert_eq!(
        engine.confirm_hold(hold, "pay_1".into()).await.unwrap(),
        Confirmation::AlreadyConfirmed(room)
    );
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let (homestay, room) = (Ulid::new(), Ulid::new());
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_homestay(homestay, "host-1".into(), None).await.unwrap();
        engine.create_room(room, homestay, spec(10_000, 2)).await.unwrap();
        engine
            .create_voucher(voucher("KEEP", DiscountKind::Percentage { basis_points: 2_500 }, None))
            .await
            .unwrap();
        engine.add_rule(Ulid::new(), homestay, night(20), night(21), true).await.unwrap();
        for i in 0..10 {
            let hold = Ulid::new();
            engine
                .place_hold(hold, room, night(i), night(i + 1), guest("Ana"), None)
                .await
                .unwrap();
            engine.release_hold(hold).await.unwrap();
        }
        let kept = Ulid::new();
        engine
            .place_hold(kept, room, night(3), night(5), with_voucher("Ana", "keep"), None)
            .await
            .unwrap();
        engine.confirm_hold(kept, "pay_7".into()).await.unwrap();

        assert!(engine.wal_appends_since_compact().await >= 25);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_bookings(BookingFilter::All).await.len(), 1);
    assert_eq!(voucher_used(&engine, "KEEP").await, 1);
    assert_eq!(engine.get_rules(homestay).await.unwrap().len(), 1);
    assert_eq!(engine.list_rooms(None).await.len(), 1);
    assert!(matches!(
        engine
            .confirm_booking(Ulid::new(), room, night(0), night(1), guest("Ben"), Some("pay_7".into()))
            .await,
        Err(EngineError::PaymentReused { .. })
    ));
}

#[tokio::test]
async fn compaction_does_not_block_room_holders_reading_their_homestay() {
    // The homestay sorts before its room.
    let homestay = Ulid::from(1u128 << 80);
    let room = Ulid::from(2u128 << 80);
    let engine = Arc::new(Engine::new(test_wal_path("compact_lock_order.wal")).unwrap());
    engine.create_homestay(homestay, "host-1".into(), None).await.unwrap();
    engine.create_room(room, homestay, spec(10_000, 2)).await.unwrap();

    // A booking in progress: room write lock held, homestay rules still to read.
    let room_rs = engine.get_listing(&room).unwrap();
    let guard = room_rs.write_owned().await;

    let compactor = tokio::spawn({
        let engine = engine.clone();
        async move { engine.compact_wal().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let rule_writer = tokio::spawn({
        let engine = engine.clone();
        async move { engine.add_rule(Ulid::new(), homestay, night(0), night(1), true).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let span = Span::new(night(0), night(2));
    let inherited = tokio::time::timeout(Duration::from_secs(3), engine.collect_inherited_rules(&guard, &span))
        .await
        .expect("room holder stuck behind compaction");
    assert_eq!(inherited.unwrap().blackout.len(), 1);
    drop(guard);

    let wait = Duration::from_secs(3);
    tokio::time::timeout(wait, compactor).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(wait, rule_writer).await.unwrap().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compaction_runs_alongside_writers() {
    let path = test_wal_path("compact_concurrent.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());
    let homestay = Ulid::new();
    engine.create_homestay(homestay, "host-1".into(), None).await.unwrap();
    let mut rooms = Vec::new();
    for _ in 0..4 {
        let room = Ulid::new();
        engine.create_room(room, homestay, spec(10_000, 2)).await.unwrap();
        rooms.push(room);
    }

    let mut tasks = Vec::new();
    for (w, room) in rooms.iter().copied().enumerate() {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20 {
                let n = (i * 2) as i64;
                engine
                    .confirm_booking(Ulid::new(), room, night(n), night(n + 1), guest("Ana"), Some(format!("pay_{w}_{i}")))
                    .await
                    .unwrap();
                if i % 5 == 0 {
                    engine.add_rule(Ulid::new(), homestay, night(100 + n), night(101 + n), true).await.unwrap();
                }
            }
        }));
    }
    let compactor = tokio::spawn({
        let engine = engine.clone();
        async move {
            for _ in 0..10 {
                engine.compact_wal().await.unwrap();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    });

    let all = async {
        for t in tasks {
            t.await.unwrap();
        }
        compactor.await.unwrap();
    };
    tokio::time::timeout(Duration::from_secs(20), all).await.expect("writers and compaction deadlocked");
    drop(engine);

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_bookings(BookingFilter::All).await.len(), 80);
    assert_eq!(engine.get_rules(homestay).await.unwrap().len(), 16);
    assert_eq!(engine.payments.len(), 80);
}
