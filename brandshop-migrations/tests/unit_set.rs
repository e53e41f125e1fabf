//! The registered brandshop units, run end to end against the memory store.

use brandshop_migrations::collections::{
    ADVENT_CALENDAR, ANSWER_LOGS, BRANDS, CODE_GROUPS, DEALS, LEGACY_ANSWER_LOGS, LOGIN_IMAGES,
    ONBOARDING_QUESTIONS, USERS,
};
use brandshop_migrations::unit_set;
use docshift::engine::{Direction, Migrator, Target, UnitState};
use docshift::errors::MigrationError;
use docshift::store::MemoryStore;
use docshift::Document;
use serde_json::json;

const DROP_TEXT: &str = "20230501090000_drop_legacy_answer_log_text";
const ADVENT: &str = "20231120120000_seed_advent_calendar";

fn fixture(name: &str) -> MemoryStore {
    MemoryStore::new(name)
        .with_documents(
            BRANDS,
            vec![
                Document::new("b1").with("name", "Acme").with("logo", "acme.png"),
                Document::new("b2").with("name", "Globex"),
            ],
        )
        .with_documents(
            DEALS,
            vec![
                Document::new("d1")
                    .with("brandId", "b1")
                    .with("discount", "15")
                    .with("codes", json!(["A1", "A2"])),
                Document::new("d2")
                    .with("brandId", "b2")
                    .with("discount", "half price")
                    .with("codes", json!([])),
            ],
        )
        .with_documents(
            USERS,
            vec![Document::new("u1").with("favourite", "b1"), Document::new("u2")],
        )
        .with_documents(
            ANSWER_LOGS,
            vec![Document::new("a1").with("optionId", "style_1").with("text", "Classic")],
        )
        .with_documents(
            LEGACY_ANSWER_LOGS,
            vec![Document::new("l1").with("text", "Sporty")],
        )
}

#[test]
fn every_unit_is_registered_in_order() {
    let units = unit_set().unwrap();
    let ids = units.ids();
    assert_eq!(ids.len(), 10);
    assert_eq!(
        ids.first().copied(),
        Some("20230105120000_seed_onboarding_questions")
    );
    assert_eq!(ids.last().copied(), Some(ADVENT));
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn full_history_applies_on_a_test_store() {
    let store = fixture("brandshop_test");
    let migrator = Migrator::new(unit_set().unwrap());

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert!(summary.is_success(), "{:?}", summary.error);
    assert_eq!(summary.processed.len(), 10);

    assert_eq!(store.snapshot(ONBOARDING_QUESTIONS).len(), 4);
    assert_eq!(
        store.get(BRANDS, "b1").unwrap().get_str("logoUrl"),
        Some("acme.png")
    );

    let d1 = store.get(DEALS, "d1").unwrap();
    assert_eq!(d1.get("discount"), Some(&json!(15)));
    assert_eq!(d1.get_str("brandName"), Some("Acme"));
    assert_eq!(d1.get_str("codeGroupId"), Some("d1_codes"));
    assert_eq!(
        store.get(DEALS, "d2").unwrap().get_str("discount"),
        Some("half price")
    );

    assert_eq!(
        store.get(CODE_GROUPS, "d1_codes").unwrap().get_str("state"),
        Some("available")
    );
    assert_eq!(
        store.get(CODE_GROUPS, "d2_codes").unwrap().get_str("state"),
        Some("exhausted")
    );
    assert_eq!(
        store.get(USERS, "u1").unwrap().get("favourites"),
        Some(&json!(["b1"]))
    );
    assert_eq!(store.snapshot(LOGIN_IMAGES).len(), 3);
    assert!(store.get(ANSWER_LOGS, "a1").unwrap().get("text").is_none());
    assert!(store.snapshot(LEGACY_ANSWER_LOGS).is_empty());
    assert_eq!(store.snapshot(ADVENT_CALENDAR).len(), 24);

    let status = migrator.status(&store).await.unwrap();
    assert_eq!(status.count(UnitState::Applied), 10);
    assert!(status.inconsistency.is_none());
}

#[tokio::test]
async fn production_store_stops_at_the_destructive_unit() {
    let store = fixture("brandshop");
    let migrator = Migrator::new(unit_set().unwrap());

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert_eq!(summary.processed.len(), 8);
    assert_eq!(summary.failed.as_deref(), Some(DROP_TEXT));
    assert!(matches!(summary.error, Some(MigrationError::GuardRejected { .. })));
    assert_eq!(store.snapshot(LEGACY_ANSWER_LOGS).len(), 1);
    assert_eq!(
        store.get(ANSWER_LOGS, "a1").unwrap().get_str("text"),
        Some("Classic")
    );
}

#[tokio::test]
async fn history_reverts_down_to_the_irreversible_unit() {
    let store = fixture("brandshop_test");
    let migrator = Migrator::new(unit_set().unwrap());
    migrator.run(&store, Direction::Up, &Target::All).await.unwrap();

    let err = migrator.run(&store, Direction::Down, &Target::All).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::NotReversible { ref unit_id, .. } if unit_id == DROP_TEXT
    ));

    let summary = migrator
        .run(&store, Direction::Down, &Target::To(DROP_TEXT.into()))
        .await
        .unwrap();
    assert_eq!(summary.processed, [ADVENT]);
    assert!(store.snapshot(ADVENT_CALENDAR).is_empty());
}

#[tokio::test]
async fn history_before_the_drop_round_trips() {
    let store = fixture("brandshop_test");
    let before_deals = store.snapshot(DEALS);
    let before_users = store.snapshot(USERS);
    let before_brands = store.snapshot(BRANDS);
    let migrator = Migrator::new(unit_set().unwrap());

    migrator
        .run(
            &store,
            Direction::Up,
            &Target::To("20230410100000_seed_login_images".into()),
        )
        .await
        .unwrap();
    let summary = migrator.run(&store, Direction::Down, &Target::All).await.unwrap();

    assert!(summary.is_success());
    // Discount conversion, favourites wrapping and code classification report loss
    assert_eq!(summary.warnings.len(), 3);
    assert_eq!(store.snapshot(DEALS), before_deals);
    assert_eq!(store.snapshot(USERS), before_users);
    assert_eq!(store.snapshot(BRANDS), before_brands);
    assert!(store.snapshot(CODE_GROUPS).is_empty());
}
