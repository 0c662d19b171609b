use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Weekday;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use quadra::clock::{ArenaClock, format_time_of_day, parse_civil_date, parse_instant, parse_time_of_day};
use quadra::config::Config;
use quadra::engine::{ConflictReason, CourtFilter, Engine, EngineError, Reservation, ScanWindow};
use quadra::model::{Blackout, BusinessHourRule, Court, CourtScope, MinuteWindow};
use quadra::store::{CachedStorage, MemoryStore, Storage};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("quadra_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn open_arena<S: Storage>(engine: &Engine<S>, weekday: Weekday, open: u16, close: u16) -> Ulid {
    let arena = Ulid::new();
    assert_ok!(
        engine
            .hours()
            .save_rule(BusinessHourRule {
                id: Ulid::new(),
                arena_id: arena,
                weekday,
                window: MinuteWindow::hours(open, close).unwrap(),
                active: true,
            })
            .await
    );
    arena
}

async fn add_court<S: Storage>(engine: &Engine<S>, arena: Ulid, name: &str) -> Ulid {
    let court = Court {
        id: Ulid::new(),
        arena_id: arena,
        name: name.into(),
        sport: Some("vôlei de praia".into()),
        active: true,
    };
    let id = court.id;
    assert_ok!(engine.save_court(court).await);
    id
}

#[tokio::test]
async fn tuesday_scenario_in_utc() {
    let engine = Engine::new(Arc::new(MemoryStore::new()), ArenaClock::utc(), ScanWindow::default());
    let arena = open_arena(&engine, Weekday::Tue, 9, 22).await;
    let court = add_court(&engine, arena, "Quadra 1").await;

    let start = parse_instant("2025-03-04T14:00:00Z").unwrap();
    let outcome = engine.guard().reserve(court, start, 60, Some("Carla".into())).await.unwrap();
    assert!(matches!(outcome, Reservation::Reserved(_)));

    let times: Vec<String> = engine
        .planner()
        .list_available_start_times(arena, parse_civil_date("2025-03-04").unwrap(), 60, None)
        .await
        .unwrap()
        .into_iter()
        .map(format_time_of_day)
        .collect();
    assert!(times.contains(&"13:00".to_string()));
    assert!(times.contains(&"15:00".to_string()));
    assert!(!times.contains(&"14:00".to_string()));
    assert_eq!(times.first().map(String::as_str), Some("09:00"));
    assert_eq!(times.last().map(String::as_str), Some("21:00"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_clients_get_one_booking() {
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        ArenaClock::sao_paulo(),
        ScanWindow::default(),
    ));
    let arena = open_arena(&engine, Weekday::Sat, 8, 22).await;
    let court = add_court(&engine, arena, "Arena Central").await;
    let date = parse_civil_date("2025-03-08").unwrap();
    let start = engine.clock().at(date, parse_time_of_day("18:00").unwrap());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.guard().reserve(court, start, 60, None).await })
        })
        .collect();

    let mut reserved = Vec::new();
    for h in handles {
        match h.await.unwrap().unwrap() {
            Reservation::Reserved(id) => reserved.push(id),
            Reservation::Conflict(reason) => {
                assert!(matches!(reason, ConflictReason::AlreadyBooked(_)))
            }
        }
    }
    assert_eq!(reserved.len(), 1);

    let free = engine
        .planner()
        .list_available_courts(arena, date, parse_time_of_day("18:00").unwrap(), 60, None)
        .await
        .unwrap();
    assert!(free.is_empty());
}

#[tokio::test]
async fn blackout_blocks_then_lifts() {
    let engine = Engine::new(Arc::new(MemoryStore::new()), ArenaClock::sao_paulo(), ScanWindow::default());
    let arena = open_arena(&engine, Weekday::Fri, 6, 23).await;
    let court = add_court(&engine, arena, "Quadra 3").await;
    let date = parse_civil_date("2025-03-07").unwrap();

    let mut blackout = Blackout {
        id: Ulid::new(),
        arena_id: arena,
        scope: CourtScope::from_json(&format!("[\"{court}\"]")).unwrap(),
        date_start: date,
        date_end: date,
        hours: Some(MinuteWindow::hours(19, 21).unwrap()),
        reason: Some("aula coletiva".into()),
        active: true,
    };
    assert_ok!(engine.blackouts().save_blackout(blackout.clone()).await);

    let at_20 = engine.clock().at(date, parse_time_of_day("20:00").unwrap());
    let outcome = engine.guard().reserve(court, at_20, 60, None).await.unwrap();
    assert_eq!(outcome, Reservation::Conflict(ConflictReason::BlackedOut(blackout.id)));

    blackout.active = false;
    assert_ok!(engine.blackouts().save_blackout(blackout).await);
    let outcome = engine.guard().reserve(court, at_20, 60, None).await.unwrap();
    assert!(matches!(outcome, Reservation::Reserved(_)));
}

#[tokio::test]
async fn filters_and_validation_surface_to_callers() {
    let engine = Engine::new(Arc::new(MemoryStore::new()), ArenaClock::utc(), ScanWindow::default());
    let arena = open_arena(&engine, Weekday::Tue, 9, 22).await;
    let court = add_court(&engine, arena, "Quadra 1").await;
    let date = parse_civil_date("2025-03-04").unwrap();

    let by_sport = CourtFilter::sport("VÔLEI DE PRAIA");
    let times = assert_ok!(
        engine
            .planner()
            .list_available_start_times(arena, date, 60, Some(&by_sport))
            .await
    );
    assert_eq!(times.len(), 13);

    let other_sport = CourtFilter::sport("squash");
    let none = assert_ok!(
        engine
            .planner()
            .list_available_start_times(arena, date, 60, Some(&other_sport))
            .await
    );
    assert!(none.is_empty());

    let err = assert_err!(engine.planner().list_available_start_times(arena, date, 45, None).await);
    assert!(err.is_validation());
    let err = assert_err!(engine.guard().reserve(court, parse_instant("2025-03-04T10:00Z").unwrap(), 0, None).await);
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn journal_restores_state_after_restart() {
    let path = test_wal_path("restart.wal");
    let date = parse_civil_date("2025-03-04").unwrap();
    let ten = parse_time_of_day("10:00").unwrap();

    let (arena, court, first) = {
        let engine = Engine::new(
            Arc::new(MemoryStore::open(&path).unwrap()),
            ArenaClock::sao_paulo(),
            ScanWindow::default(),
        );
        let arena = open_arena(&engine, Weekday::Tue, 9, 22).await;
        let court = add_court(&engine, arena, "Quadra 1").await;
        let first = engine
            .guard()
            .reserve(court, engine.clock().at(date, ten), 60, None)
            .await
            .unwrap()
            .booking_id()
            .unwrap();
        let second = engine
            .guard()
            .reserve(court, engine.clock().at(date, parse_time_of_day("11:00").unwrap()), 60, None)
            .await
            .unwrap()
            .booking_id()
            .unwrap();
        assert_ok!(engine.guard().cancel(second).await);
        assert_ok!(engine.store().compact().await);
        (arena, court, first)
    };

    let engine = Engine::new(
        Arc::new(MemoryStore::open(&path).unwrap()),
        ArenaClock::sao_paulo(),
        ScanWindow::default(),
    );
    let free = engine.planner().list_available_courts(arena, date, ten, 60, None).await.unwrap();
    assert!(free.is_empty());
    let free = engine
        .planner()
        .list_available_courts(arena, date, parse_time_of_day("11:00").unwrap(), 60, None)
        .await
        .unwrap();
    assert_eq!(free, vec![court]);

    let outcome = engine.guard().reserve(court, engine.clock().at(date, ten), 60, None).await.unwrap();
    assert_eq!(outcome, Reservation::Conflict(ConflictReason::AlreadyBooked(first)));
}

#[tokio::test]
async fn engine_built_from_config_over_cache() {
    let config = Config::from_lookup(|key| match key {
        "QUADRA_UTC_OFFSET_MINUTES" => Some("0".into()),
        "QUADRA_GRANULARITY_MINUTES" => Some("30".into()),
        "QUADRA_CACHE_TTL_SECS" => Some("60".into()),
        _ => None,
    });
    let store = Arc::new(CachedStorage::new(MemoryStore::new(), config.cache_ttl));
    let engine = Engine::from_config(store, &config).unwrap();
    let arena = open_arena(&engine, Weekday::Tue, 9, 12).await;
    add_court(&engine, arena, "Quadra 1").await;

    let times = engine
        .planner()
        .list_available_start_times(arena, parse_civil_date("2025-03-04").unwrap(), 90, None)
        .await
        .unwrap();
    let labels: Vec<String> = times.into_iter().map(format_time_of_day).collect();
    assert_eq!(labels, vec!["09:00", "09:30", "10:00", "10:30"]);
    assert_eq!(config.cache_ttl, Duration::from_secs(60));
}
