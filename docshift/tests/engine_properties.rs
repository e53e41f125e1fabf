//! End-to-end behavior of the migrator against the in-memory store.
//!
//! Covers ordering, idempotent re-application, round trips, the applied
//! prefix, failure containment, seeding and the destructive-unit guard.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use docshift::engine::{Changelog, Direction, Migrator, Resolution, Target, UnitState, plan_up};
use docshift::errors::{MigrationError, UnitError};
use docshift::store::{DocumentStore, MemoryStore};
use docshift::unit::{
    Conversion, Inverse, MigrationUnit, Reverted, SeedUnit, Step, StepUnit, UnitReport, UnitSet,
};
use docshift::{Document, Filter, Update};
use serde_json::json;

// ============================================================================
// Fixtures
// ============================================================================

const SEED: &str = "20230105120000_seed_questions";
const RENAME: &str = "20230112093000_rename_logo";
const FLAG: &str = "20230201101500_flag_featured";

fn brands() -> Vec<Document> {
    vec![
        Document::new("b1").with("name", "Acme").with("logoUrl", "a.png"),
        Document::new("b2").with("name", "Globex").with("logoUrl", "g.png"),
        Document::new("b3").with("name", "Initech"),
    ]
}

fn questions() -> Vec<Document> {
    (1..=5)
        .map(|n| Document::new(format!("q{n}")).with("prompt", format!("Question {n}")))
        .collect()
}

fn seed_unit() -> SeedUnit {
    SeedUnit::new(SEED, "questions", questions()).describe("onboarding questions")
}

fn rename_unit() -> StepUnit {
    StepUnit::new(
        RENAME,
        vec![Step::rename_field("brands", "logoUrl", "logo")],
    )
}

fn flag_unit() -> StepUnit {
    StepUnit::new(FLAG, vec![Step::add_field("brands", "featured", false)])
}

fn unit_set() -> UnitSet {
    // Registration order is not id order
    let units: Vec<Box<dyn MigrationUnit>> =
        vec![Box::new(flag_unit()), Box::new(seed_unit()), Box::new(rename_unit())];
    UnitSet::new(units).unwrap()
}

fn store() -> MemoryStore {
    MemoryStore::new("brandshop_test").with_documents("brands", brands())
}

async fn applied(migrator: &Migrator, store: &MemoryStore) -> Vec<String> {
    migrator.applied(store).await.unwrap().into_iter().collect()
}

/// Fails on `forward` while `broken` is set.
struct FlakyUnit {
    id: &'static str,
    broken: AtomicBool,
}

impl FlakyUnit {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            broken: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl MigrationUnit for FlakyUnit {
    fn id(&self) -> &str {
        self.id
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(UnitError::other("upstream data not ready"));
        }
        Ok(store
            .update_many(
                "brands",
                &Filter::all(),
                &Update::new().set("checked", true),
            )
            .await?
            .into())
    }

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError> {
        let result = store
            .update_many(
                "brands",
                &Filter::exists("checked"),
                &Update::new().unset("checked"),
            )
            .await?;
        Ok(Reverted::Restored(result.into()))
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn plan_up_ignores_input_order() {
    let seed = seed_unit();
    let rename = rename_unit();
    let flag = flag_unit();
    let shuffled: [&dyn MigrationUnit; 3] = [&flag, &seed, &rename];
    let reversed: [&dyn MigrationUnit; 3] = [&rename, &flag, &seed];

    for units in [shuffled, reversed] {
        let plan = plan_up(&BTreeSet::new(), &units).unwrap();
        let ids: Vec<&str> = plan.iter().map(|unit| unit.id()).collect();
        assert_eq!(ids, [SEED, RENAME, FLAG]);
    }
}

#[tokio::test]
async fn run_applies_in_id_order() {
    let store = store();
    let migrator = Migrator::new(unit_set());

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.processed, [SEED, RENAME, FLAG]);
    assert_eq!(summary.stats.units_processed, 3);
    assert_eq!(applied(&migrator, &store).await, [SEED, RENAME, FLAG]);
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn predicate_driven_units_reapply_cleanly() {
    let store = MemoryStore::new("brandshop_test").with_documents(
        "deals",
        vec![
            Document::new("d1").with("tags", json!(["food"])),
            Document::new("d2").with("tags", json!(["food", "partner"])),
        ],
    );
    let unit = StepUnit::new(
        "20230301000000_tag_partner_deals",
        vec![Step::update_many(
            "deals",
            Filter::all(),
            Update::new().add_to_set("tags", "partner"),
            Some(
                Inverse::new(Filter::all(), Update::new().pull("tags", "partner"))
                    .lossy("pre-existing tags are pulled too"),
            ),
        )],
    );

    unit.forward(&store).await.unwrap();
    let once = store.snapshot("deals");
    let second = unit.forward(&store).await.unwrap();

    assert_eq!(second.modified, 0);
    assert_eq!(store.snapshot("deals"), once);
    assert_eq!(
        store.get("deals", "d1").unwrap().get("tags"),
        Some(&json!(["food", "partner"]))
    );
}

#[tokio::test]
async fn rerun_after_lost_record_is_harmless() {
    let store = store();
    let migrator = Migrator::new(unit_set());
    migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    let after_first = store.snapshot("brands");

    // Simulate a crash between the data writes and the record write
    store.delete_many("changelog", &Filter::id_in([FLAG])).await.unwrap();
    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();

    assert_eq!(summary.processed, [FLAG]);
    assert_eq!(summary.stats.documents_affected, 0);
    assert_eq!(store.snapshot("brands"), after_first);
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn reversible_units_round_trip() {
    let store = store();
    let before = store.snapshot("brands");
    let migrator = Migrator::new(unit_set());

    migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert_ne!(store.snapshot("brands"), before);

    let summary = migrator.run(&store, Direction::Down, &Target::All).await.unwrap();
    assert!(summary.is_success());
    assert!(summary.warnings.is_empty());
    assert_eq!(summary.processed, [FLAG, RENAME, SEED]);
    assert_eq!(store.snapshot("brands"), before);
    assert!(store.snapshot("questions").is_empty());
    assert!(applied(&migrator, &store).await.is_empty());
}

#[tokio::test]
async fn lossy_revert_reports_a_warning() {
    let store = MemoryStore::new("brandshop_test")
        .with_documents("deals", vec![Document::new("d1").with("discount", "10.50")]);
    let unit = StepUnit::new(
        "20230201101500_discount_to_number",
        vec![Step::convert_field("deals", "discount", Conversion::TextToNumber)],
    );
    let migrator = Migrator::new(UnitSet::new(vec![Box::new(unit)]).unwrap());

    migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert_eq!(
        store.get("deals", "d1").unwrap().get("discount"),
        Some(&json!(10.5))
    );

    let summary = migrator.run(&store, Direction::Down, &Target::Count(1)).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.warnings.len(), 1);
    assert_eq!(
        summary.warnings[0].unit_id,
        "20230201101500_discount_to_number"
    );
    assert_eq!(
        store.get("deals", "d1").unwrap().get("discount"),
        Some(&json!("10.5"))
    );
}

// ============================================================================
// Prefix invariant
// ============================================================================

#[tokio::test]
async fn applied_set_stays_a_prefix() {
    let store = store();
    let migrator = Migrator::new(unit_set());

    migrator.run(&store, Direction::Up, &Target::Count(2)).await.unwrap();
    assert_eq!(applied(&migrator, &store).await, [SEED, RENAME]);

    migrator.run(&store, Direction::Down, &Target::Count(1)).await.unwrap();
    assert_eq!(applied(&migrator, &store).await, [SEED]);

    migrator.run(&store, Direction::Up, &Target::To(RENAME.into())).await.unwrap();
    assert_eq!(applied(&migrator, &store).await, [SEED, RENAME]);
}

#[tokio::test]
async fn reverting_more_than_applied_writes_nothing() {
    let store = store();
    let migrator = Migrator::new(unit_set());
    migrator.run(&store, Direction::Up, &Target::Count(1)).await.unwrap();

    let writes = store.write_count();
    let err = migrator.run(&store, Direction::Down, &Target::Count(2)).await.unwrap_err();

    assert!(matches!(err, MigrationError::InvalidRevertCount { requested: 2, applied: 1 }));
    assert_eq!(store.write_count(), writes);
    assert_eq!(applied(&migrator, &store).await, [SEED]);
}

#[tokio::test]
async fn gap_in_changelog_blocks_runs() {
    let store = store();
    let migrator = Migrator::new(unit_set());
    migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    migrator
        .resolve(&store, RENAME, Resolution::RolledBack)
        .await
        .unwrap();

    let err = migrator.run(&store, Direction::Up, &Target::All).await.unwrap_err();
    assert!(matches!(err, MigrationError::OutOfOrderState { .. }));

    let status = migrator.status(&store).await.unwrap();
    assert!(status.inconsistency.is_some());
    assert_eq!(status.count(UnitState::Reverted), 1);

    // Repair by marking it applied again
    migrator.resolve(&store, RENAME, Resolution::Applied).await.unwrap();
    assert!(migrator.status(&store).await.unwrap().inconsistency.is_none());
}

// ============================================================================
// Failure containment
// ============================================================================

#[tokio::test]
async fn failure_stops_the_run_and_keeps_progress() {
    let store = store();
    let flaky: Box<dyn MigrationUnit> = Box::new(FlakyUnit::new(RENAME));
    let units = UnitSet::new(vec![Box::new(seed_unit()), flaky, Box::new(flag_unit())]).unwrap();
    let migrator = Migrator::new(units);

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert!(!summary.is_success());
    assert_eq!(summary.processed, [SEED]);
    assert_eq!(summary.failed.as_deref(), Some(RENAME));
    assert!(matches!(
        summary.error,
        Some(MigrationError::UnitExecution { ref unit_id, .. }) if unit_id == RENAME
    ));
    assert_eq!(applied(&migrator, &store).await, [SEED]);
    assert!(store.get("brands", "b1").unwrap().get("featured").is_none());

    // Fix the unit; the next run resumes at the failed one
    let fixed = FlakyUnit::new(RENAME);
    fixed.broken.store(false, Ordering::SeqCst);
    let fixed: Box<dyn MigrationUnit> = Box::new(fixed);
    let units = UnitSet::new(vec![Box::new(seed_unit()), fixed, Box::new(flag_unit())]).unwrap();
    let migrator = Migrator::new(units);

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.processed, [RENAME, FLAG]);
    assert_eq!(applied(&migrator, &store).await, [SEED, RENAME, FLAG]);
}

#[tokio::test]
async fn irreversible_unit_blocks_down_before_any_write() {
    let store = store();
    let drop = StepUnit::new(
        "20230501090000_drop_name",
        vec![Step::remove_field("brands", "name")],
    );
    let migrator =
        Migrator::new(UnitSet::new(vec![Box::new(seed_unit()), Box::new(drop)]).unwrap());
    migrator.run(&store, Direction::Up, &Target::All).await.unwrap();

    let writes = store.write_count();
    let err = migrator.run(&store, Direction::Down, &Target::All).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::NotReversible { ref unit_id, .. } if unit_id == "20230501090000_drop_name"
    ));
    assert_eq!(store.write_count(), writes);
}

// ============================================================================
// Seeding
// ============================================================================

#[tokio::test]
async fn seed_inserts_only_missing_documents() {
    let existing = vec![
        Document::new("q2").with("prompt", "Edited by hand"),
        Document::new("q4").with("prompt", "Also edited"),
    ];
    let store = MemoryStore::new("brandshop_test").with_documents("questions", existing.clone());
    let migrator = Migrator::new(UnitSet::new(vec![Box::new(seed_unit())]).unwrap());

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert_eq!(summary.stats.documents_affected, 3);
    assert_eq!(store.snapshot("questions").len(), 5);
    assert_eq!(store.get("questions", "q2"), Some(existing[0].clone()));
    assert_eq!(store.get("questions", "q4"), Some(existing[1].clone()));

    let record = Changelog::default().get(&store, SEED).await.unwrap().unwrap();
    assert_eq!(record.documents_affected, 3);
    assert_eq!(record.description, "onboarding questions");
}

// ============================================================================
// Guard
// ============================================================================

#[tokio::test]
async fn destructive_unit_refused_on_production_store() {
    let store =
        MemoryStore::new("brandshop").with_documents("answer_log", vec![Document::new("a1")]);
    let drop = StepUnit::new(
        "20230501090000_drop_answer_log",
        vec![Step::drop_collection("answer_log")],
    );
    let migrator = Migrator::new(UnitSet::new(vec![Box::new(drop)]).unwrap());

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert!(matches!(
        summary.error,
        Some(MigrationError::GuardRejected { ref store, .. }) if store == "brandshop"
    ));
    assert_eq!(store.write_count(), 0);
    assert_eq!(store.snapshot("answer_log").len(), 1);
}

#[tokio::test]
async fn dry_run_checks_guard_and_writes_nothing() {
    let store = store();
    let migrator = Migrator::new(unit_set()).with_dry_run(true);

    let summary = migrator.run(&store, Direction::Up, &Target::All).await.unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.processed, [SEED, RENAME, FLAG]);
    assert_eq!(store.write_count(), 0);

    let production = MemoryStore::new("brandshop");
    let drop = StepUnit::new(
        "20230501090000_drop_answer_log",
        vec![Step::drop_collection("answer_log")],
    );
    let migrator = Migrator::new(UnitSet::new(vec![Box::new(drop)]).unwrap()).with_dry_run(true);
    let err = migrator.run(&production, Direction::Up, &Target::All).await.unwrap_err();
    assert!(matches!(err, MigrationError::GuardRejected { .. }));
}
