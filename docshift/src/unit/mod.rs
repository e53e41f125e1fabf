//! Migration units: the paired forward/backward procedures the engine orders and runs.
//!
//! This module provides:
//! - `MigrationUnit` - the trait every unit implements
//! - `StepUnit` / `Step` - declarative units whose inverses are derived
//! - `SeedUnit` - fixed documents inserted by id
//! - `UnitSet` - validated, id-ordered collection of units
//! - `UnitRegistration` / `register_unit!` - link-time discovery through `inventory`

mod seed;
mod steps;

pub use self::seed::SeedUnit;
pub use self::steps::{Conversion, Inverse, Step, StepUnit};

use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::errors::{MigrationError, UnitError};
use crate::store::{DocumentStore, WriteResult};

static UNIT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{8,}([_-][0-9]+)?[_-][a-z0-9_]+$").expect("unit id pattern is valid")
});

/// How faithfully a unit's backward procedure restores the prior state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reversibility {
    #[default]
    Reversible,
    /// Backward runs but cannot restore everything; the reason is surfaced as a warning.
    Lossy(String),
    /// Backward cannot run at all.
    Irreversible(String),
}

impl Reversibility {
    fn rank(&self) -> u8 {
        match self {
            Reversibility::Reversible => 0,
            Reversibility::Lossy(_) => 1,
            Reversibility::Irreversible(_) => 2,
        }
    }

    /// The weaker of two guarantees. Lossy reasons are joined.
    pub fn weakest(self, other: Reversibility) -> Reversibility {
        match (self, other) {
            (Reversibility::Lossy(a), Reversibility::Lossy(b)) => {
                Reversibility::Lossy(format!("{a}; {b}"))
            }
            (a, b) if b.rank() > a.rank() => b,
            (a, _) => a,
        }
    }

    pub fn is_irreversible(&self) -> bool {
        matches!(self, Reversibility::Irreversible(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Reversibility::Reversible => "reversible",
            Reversibility::Lossy(_) => "lossy",
            Reversibility::Irreversible(_) => "irreversible",
        }
    }
}

/// Document counts reported by a unit procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub matched: u64,
    pub modified: u64,
    pub inserted: u64,
    pub deleted: u64,
}

impl UnitReport {
    pub fn inserted(count: u64) -> Self {
        Self {
            inserted: count,
            ..Self::default()
        }
    }

    pub fn deleted(count: u64) -> Self {
        Self {
            deleted: count,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: UnitReport) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.inserted += other.inserted;
        self.deleted += other.deleted;
    }

    /// Documents changed, inserted or deleted.
    pub fn documents_affected(&self) -> u64 {
        self.modified + self.inserted + self.deleted
    }
}

impl From<WriteResult> for UnitReport {
    fn from(result: WriteResult) -> Self {
        Self {
            matched: result.matched,
            modified: result.modified,
            ..Self::default()
        }
    }
}

/// Outcome of a backward procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Reverted {
    Restored(UnitReport),
    /// The revert ran but could not restore every value.
    Lossy { report: UnitReport, warning: String },
    /// Nothing was touched; the unit has no backward procedure.
    NotReversible { reason: String },
}

/// Non-fatal notice that a revert could not restore all data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLossWarning {
    pub unit_id: String,
    pub message: String,
}

impl fmt::Display for DataLossWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit_id, self.message)
    }
}

/// A single migration: one step of the schema history.
///
/// Forward and backward procedures must be idempotent: they select only the
/// documents still in the source shape (by field existence or type) so that a
/// re-run after a crash converges instead of double-applying.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    /// Timestamp-prefixed id; the only ordering key.
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn reversibility(&self) -> Reversibility {
        Reversibility::Reversible
    }

    /// Destructive units only run against stores marked as test instances.
    fn is_destructive(&self) -> bool {
        false
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError>;

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError>;
}

impl fmt::Debug for dyn MigrationUnit + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit").field("id", &self.id()).finish()
    }
}

/// Link-time registration of a unit constructor.
pub struct UnitRegistration {
    pub build: fn() -> Box<dyn MigrationUnit>,
}

impl UnitRegistration {
    pub const fn new(build: fn() -> Box<dyn MigrationUnit>) -> Self {
        Self { build }
    }
}

inventory::collect!(UnitRegistration);

/// Register a unit constructor so [`UnitSet::from_inventory`] discovers it.
///
/// ```ignore
/// fn unit() -> Box<dyn MigrationUnit> { Box::new(StepUnit::new(...)) }
/// docshift::register_unit!(unit);
/// ```
#[macro_export]
macro_rules! register_unit {
    ($build:path) => {
        $crate::inventory::submit! {
            $crate::unit::UnitRegistration::new($build)
        }
    };
}

/// Check that an id carries a sortable timestamp prefix.
pub fn validate_unit_id(id: &str) -> Result<(), MigrationError> {
    if UNIT_ID.is_match(id) {
        Ok(())
    } else {
        Err(MigrationError::InvalidUnitId { unit_id: id.to_string() })
    }
}

/// Validated units ordered by id.
pub struct UnitSet {
    units: Vec<Box<dyn MigrationUnit>>,
}

impl UnitSet {
    /// Validate ids, reject duplicates and sort. Input order is irrelevant.
    pub fn new(mut units: Vec<Box<dyn MigrationUnit>>) -> Result<Self, MigrationError> {
        for unit in &units {
            validate_unit_id(unit.id())?;
        }
        units.sort_by(|a, b| a.id().cmp(b.id()));
        if let Some(pair) = units.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
            return Err(MigrationError::DuplicateUnit {
                unit_id: pair[0].id().to_string(),
            });
        }
        Ok(Self { units })
    }

    /// Every unit submitted through [`register_unit!`] in the linked binary.
    pub fn from_inventory() -> Result<Self, MigrationError> {
        Self::new(
            inventory::iter::<UnitRegistration>()
                .map(|registration| (registration.build)())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn MigrationUnit> {
        self.units.iter().map(|unit| unit.as_ref())
    }

    pub fn as_refs(&self) -> Vec<&dyn MigrationUnit> {
        self.iter().collect()
    }

    pub fn get(&self, id: &str) -> Option<&dyn MigrationUnit> {
        self.iter().find(|unit| unit.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(|unit| unit.id()).collect()
    }
}

impl fmt::Debug for UnitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn seed(id: &str) -> Box<dyn MigrationUnit> {
        Box::new(SeedUnit::new(id, "things", vec![Document::new("t1")]))
    }

    #[test]
    fn accepts_timestamp_prefixed_ids() {
        for id in [
            "20230105120000_seed_questions",
            "20241228_100000_init",
            "20230201-discount_to_number",
        ] {
            assert!(validate_unit_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn rejects_unsortable_ids() {
        for id in ["seed_questions", "2023_init", "20230105120000_Seed", "20230105120000"] {
            assert!(matches!(
                validate_unit_id(id),
                Err(MigrationError::InvalidUnitId { .. })
            ));
        }
    }

    #[test]
    fn unit_set_sorts_by_id() {
        let set = UnitSet::new(vec![
            seed("20230301000000_c"),
            seed("20230101000000_a"),
            seed("20230201000000_b"),
        ])
        .unwrap();
        assert_eq!(
            set.ids(),
            ["20230101000000_a", "20230201000000_b", "20230301000000_c"]
        );
        assert!(set.get("20230201000000_b").is_some());
    }

    #[test]
    fn unit_set_rejects_duplicates() {
        let err =
            UnitSet::new(vec![seed("20230101000000_a"), seed("20230101000000_a")]).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::DuplicateUnit { ref unit_id } if unit_id == "20230101000000_a"
        ));
    }

    #[test]
    fn weakest_reversibility_wins() {
        let lossy = Reversibility::Lossy("first element only".into());
        let gone = Reversibility::Irreversible("field removed".into());
        assert_eq!(Reversibility::Reversible.weakest(lossy.clone()), lossy);
        assert_eq!(lossy.clone().weakest(gone.clone()), gone);
        assert_eq!(gone.clone().weakest(Reversibility::Reversible), gone);
        assert_eq!(
            lossy.clone().weakest(Reversibility::Lossy("canonical numbers".into())),
            Reversibility::Lossy("first element only; canonical numbers".into())
        );
    }

    #[test]
    fn report_counts_affected_documents() {
        let mut report = UnitReport::from(WriteResult { matched: 4, modified: 3 });
        report.merge(UnitReport::inserted(2));
        report.merge(UnitReport::deleted(1));
        assert_eq!(report.documents_affected(), 6);
        assert_eq!(report.matched, 4);
    }
}
