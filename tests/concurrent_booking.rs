use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use innkeep::engine::{Engine, EngineError, today};
use innkeep::model::*;

// ── Test infrastructure ──────────────────────────────────────

fn journal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("innkeep.journal")
}

async fn start_engine(rooms: &[&str]) -> (Arc<Engine>, Vec<Ulid>) {
    let engine = Engine::new(journal_path()).unwrap();
    let category = Ulid::new();
    engine
        .create_category(category, "Standard".into(), Decimal::from(120), 2)
        .await
        .unwrap();
    let mut ids = Vec::new();
    for number in rooms {
        let id = Ulid::new();
        engine
            .create_room(
                id,
                NewRoom {
                    number: (*number).into(),
                    category_id: category,
                    floor_id: None,
                    capacity: 2,
                },
            )
            .await
            .unwrap();
        ids.push(id);
    }
    (Arc::new(engine), ids)
}

fn request(room_ids: Vec<Ulid>, guest: usize, nights: (i64, i64)) -> BookingRequest {
    BookingRequest {
        room_ids,
        customer: CustomerRef::New(CustomerInfo {
            full_name: format!("Guest {guest}"),
            phone: format!("555-{guest:04}"),
            email: None,
            id_card: None,
        }),
        check_in: today() + Duration::days(nights.0),
        check_out: today() + Duration::days(nights.1),
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_requests_book_a_room_once() {
    let (engine, rooms) = start_engine(&["101"]).await;

    let attempts = (0..32).map(|guest| {
        let engine = engine.clone();
        let room = rooms[0];
        tokio::spawn(async move {
            engine
                .create_booking(request(vec![room], guest, (10, 13)))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        let err = r.as_ref().unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{err}");
    }

    let live = engine
        .list_bookings(&BookingFilter {
            room_id: Some(rooms[0]),
            ..BookingFilter::default()
        })
        .await;
    assert_eq!(live.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_multi_room_requests_never_double_book() {
    let (engine, rooms) = start_engine(&["201", "202", "203"]).await;

    // Every request wants two of the three rooms, in varying order.
    let picks = [
        vec![rooms[0], rooms[1]],
        vec![rooms[2], rooms[1]],
        vec![rooms[1], rooms[0]],
        vec![rooms[2], rooms[0]],
    ];
    let attempts = picks.iter().cloned().enumerate().map(|(guest, pick)| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.create_booking(request(pick, guest, (5, 7))).await })
    });
    let results = join_all(attempts).await;

    let mut booked = Vec::new();
    for joined in results {
        if let Ok(outcome) = joined.unwrap() {
            booked.extend(outcome.created().iter().map(|b| b.room_id));
        }
    }
    booked.sort();
    let mut distinct = booked.clone();
    distinct.dedup();
    assert_eq!(booked, distinct, "a room was booked twice");
    assert_eq!(booked.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_stays_all_succeed() {
    let (engine, rooms) = start_engine(&["301"]).await;

    let attempts = (0..20).map(|guest| {
        let engine = engine.clone();
        let room = rooms[0];
        let start = 1 + 2 * guest as i64;
        tokio::spawn(async move {
            engine
                .create_booking(request(vec![room], guest, (start, start + 2)))
                .await
        })
    });
    for joined in join_all(attempts).await {
        assert_ok!(joined.unwrap());
    }

    assert_err!(
        engine
            .create_booking(request(vec![rooms[0]], 99, (2, 4)))
            .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_customers_with_same_phone_are_merged() {
    let (engine, _) = start_engine(&[]).await;

    let attempts = (0..16).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .find_or_create_customer(CustomerInfo {
                    full_name: "Same Person".into(),
                    phone: "555-4242".into(),
                    email: None,
                    id_card: None,
                })
                .await
        })
    });
    let mut ids: Vec<Ulid> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_with_one_id_install_it_once() {
    let (engine, _) = start_engine(&[]).await;
    let category = Ulid::new();
    let attempts = (0..16).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .create_category(category, "Suite".into(), Decimal::from(300), 4)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err(), &EngineError::AlreadyExists(category));
    }

    let room = Ulid::new();
    let attempts = (0..16).map(|n| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .create_room(
                    room,
                    NewRoom {
                        number: format!("{}", 500 + n),
                        category_id: category,
                        floor_id: None,
                        capacity: 2,
                    },
                )
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert_eq!(r.as_ref().unwrap_err(), &EngineError::AlreadyExists(room));
    }

    let rooms = engine.list_rooms().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room);
    // Losing attempts leave their room numbers free.
    let winner = rooms[0].number.clone();
    for n in 0..16 {
        let number = format!("{}", 500 + n);
        if number == winner {
            continue;
        }
        assert_ok!(
            engine
                .create_room(
                    Ulid::new(),
                    NewRoom {
                        number,
                        category_id: category,
                        floor_id: None,
                        capacity: 2,
                    },
                )
                .await
        );
    }
    assert_eq!(engine.list_rooms().await.len(), 16);
}
