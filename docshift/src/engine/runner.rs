//! Sequential execution of planned units against a store.

use std::collections::BTreeSet;
use std::time::Instant;

use log::{info, warn};
use serde::Serialize;

use super::plan::{self, Direction, Target};
use super::state::{ApplicationRecord, Changelog, RecordDirection};
use crate::errors::MigrationError;
use crate::guard::Guard;
use crate::store::DocumentStore;
use crate::unit::{DataLossWarning, MigrationUnit, Reverted, UnitReport, UnitSet};

/// Statistics from a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Units applied or reverted successfully
    pub units_processed: u32,
    /// Documents changed, inserted or deleted
    pub documents_affected: u64,
    /// Wall-clock time of the whole run in milliseconds
    pub total_time_ms: u64,
}

/// Outcome of [`Migrator::run`].
///
/// A failed unit does not make `run` return `Err`: progress up to the failure
/// is kept and reported here, and the next run resumes from the failed unit.
#[derive(Debug)]
pub struct RunSummary {
    pub direction: Direction,
    pub dry_run: bool,
    /// Ids processed successfully, in execution order; the planned ids on a dry run
    pub processed: Vec<String>,
    pub failed: Option<String>,
    pub error: Option<MigrationError>,
    pub warnings: Vec<DataLossWarning>,
    pub stats: RunStats,
}

impl RunSummary {
    fn new(direction: Direction, dry_run: bool) -> Self {
        Self {
            direction,
            dry_run,
            processed: Vec::new(),
            failed: None,
            error: None,
            warnings: Vec::new(),
            stats: RunStats::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of reverting a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RevertOutcome {
    pub report: UnitReport,
    pub warning: Option<DataLossWarning>,
}

/// State of a known unit against one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Applied,
    Pending,
    Reverted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    pub id: String,
    pub description: String,
    pub state: UnitState,
    pub reversibility: &'static str,
    pub destructive: bool,
    pub record: Option<ApplicationRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub units: Vec<UnitStatus>,
    /// Applied records whose unit is no longer known
    pub unknown: Vec<ApplicationRecord>,
    /// Set when the applied ids are not a prefix of the unit order
    pub inconsistency: Option<String>,
}

impl StatusReport {
    pub fn count(&self, state: UnitState) -> usize {
        self.units.iter().filter(|unit| unit.state == state).count()
    }
}

/// Operator override for `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    RolledBack,
}

/// Plans and runs units, one at a time, recording each in the changelog.
pub struct Migrator {
    units: UnitSet,
    changelog: Changelog,
    guard: Guard,
    dry_run: bool,
}

impl Migrator {
    pub fn new(units: UnitSet) -> Self {
        Self {
            units,
            changelog: Changelog::default(),
            guard: Guard::default(),
            dry_run: false,
        }
    }

    pub fn with_changelog(mut self, changelog: Changelog) -> Self {
        self.changelog = changelog;
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    /// Plan and report without running units or writing records.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn units(&self) -> &UnitSet {
        &self.units
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    pub async fn applied(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<BTreeSet<String>, MigrationError> {
        Ok(self.changelog.applied_ids(store).await?)
    }

    pub async fn plan(
        &self,
        store: &dyn DocumentStore,
        direction: Direction,
        target: &Target,
    ) -> Result<Vec<&dyn MigrationUnit>, MigrationError> {
        let applied = self.applied(store).await?;
        plan::plan(direction, target, &applied, &self.units.as_refs())
    }

    pub async fn status(&self, store: &dyn DocumentStore) -> Result<StatusReport, MigrationError> {
        let records = self.changelog.load(store).await?;
        let applied: BTreeSet<String> = records
            .iter()
            .filter(|record| record.is_applied())
            .map(|record| record.unit_id.clone())
            .collect();

        let units = self
            .units
            .iter()
            .map(|unit| {
                let record = records.iter().find(|record| record.unit_id == unit.id()).cloned();
                let state = match record.as_ref().map(|record| record.direction) {
                    Some(RecordDirection::Applied) => UnitState::Applied,
                    Some(RecordDirection::Reverted) => UnitState::Reverted,
                    None => UnitState::Pending,
                };
                UnitStatus {
                    id: unit.id().to_string(),
                    description: unit.description().to_string(),
                    state,
                    reversibility: unit.reversibility().label(),
                    destructive: unit.is_destructive(),
                    record,
                }
            })
            .collect();

        let unknown = records
            .iter()
            .filter(|record| record.is_applied() && self.units.get(&record.unit_id).is_none())
            .cloned()
            .collect();

        let inconsistency = plan::plan_up(&applied, &self.units.as_refs())
            .err()
            .map(|err| err.to_string());

        Ok(StatusReport {
            units,
            unknown,
            inconsistency,
        })
    }

    /// Run one unit forward and record it as applied.
    ///
    /// Data writes and the record write are separate: if the record write is
    /// lost the unit simply runs again next time.
    pub async fn apply_unit(
        &self,
        unit: &dyn MigrationUnit,
        store: &dyn DocumentStore,
    ) -> Result<UnitReport, MigrationError> {
        self.guard.check(unit, store)?;
        info!("applying {}", unit.id());

        let started = Instant::now();
        let report = unit
            .forward(store)
            .await
            .map_err(|source| MigrationError::UnitExecution {
                unit_id: unit.id().to_string(),
                source,
            })?;

        let mut record = ApplicationRecord::applied(unit.id(), unit.description());
        record.execution_time_ms = started.elapsed().as_millis() as u64;
        record.documents_affected = report.documents_affected();
        self.changelog.record_applied(store, &record).await?;

        info!(
            "applied {} in {}ms ({} document(s) affected)",
            unit.id(),
            record.execution_time_ms,
            record.documents_affected
        );
        Ok(report)
    }

    /// Run one unit backward and flag its record as reverted.
    pub async fn revert_unit(
        &self,
        unit: &dyn MigrationUnit,
        store: &dyn DocumentStore,
    ) -> Result<RevertOutcome, MigrationError> {
        self.guard.check(unit, store)?;
        info!("reverting {}", unit.id());

        let reverted = unit
            .backward(store)
            .await
            .map_err(|source| MigrationError::UnitExecution {
                unit_id: unit.id().to_string(),
                source,
            })?;

        let outcome = match reverted {
            Reverted::Restored(report) => RevertOutcome { report, warning: None },
            Reverted::Lossy { report, warning } => {
                warn!("{} reverted with data loss: {}", unit.id(), warning);
                RevertOutcome {
                    report,
                    warning: Some(DataLossWarning {
                        unit_id: unit.id().to_string(),
                        message: warning,
                    }),
                }
            }
            Reverted::NotReversible { reason } => {
                return Err(MigrationError::NotReversible {
                    unit_id: unit.id().to_string(),
                    reason,
                });
            }
        };

        self.changelog.mark_reverted(store, unit.id(), false).await?;
        info!("reverted {}", unit.id());
        Ok(outcome)
    }

    /// Plan, then run each planned unit in order, stopping at the first failure.
    ///
    /// Planning errors (out-of-order state, bad counts, unknown targets,
    /// irreversible units in a down plan) are returned as `Err` before any
    /// write happens.
    pub async fn run(
        &self,
        store: &dyn DocumentStore,
        direction: Direction,
        target: &Target,
    ) -> Result<RunSummary, MigrationError> {
        let started = Instant::now();
        let planned = self.plan(store, direction, target).await?;
        let mut summary = RunSummary::new(direction, self.dry_run);

        if planned.is_empty() {
            info!("nothing to run {direction}");
            return Ok(summary);
        }

        if self.dry_run {
            for unit in &planned {
                self.guard.check(*unit, store)?;
            }
            summary.processed = planned.iter().map(|unit| unit.id().to_string()).collect();
            info!("dry run: {} unit(s) would run {direction}", summary.processed.len());
            return Ok(summary);
        }

        for unit in planned {
            let result = match direction {
                Direction::Up => self.apply_unit(unit, store).await.map(|report| (report, None)),
                Direction::Down => self
                    .revert_unit(unit, store)
                    .await
                    .map(|outcome| (outcome.report, outcome.warning)),
            };

            match result {
                Ok((report, warning)) => {
                    summary.processed.push(unit.id().to_string());
                    summary.stats.units_processed += 1;
                    summary.stats.documents_affected += report.documents_affected();
                    summary.warnings.extend(warning);
                }
                Err(err) => {
                    warn!("{} failed: {err}", unit.id());
                    summary.failed = Some(unit.id().to_string());
                    summary.error = Some(err);
                    break;
                }
            }
        }

        summary.stats.total_time_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Mark a unit applied or rolled back without running it.
    ///
    /// Returns `false` when rolling back a unit that has no record.
    pub async fn resolve(
        &self,
        store: &dyn DocumentStore,
        unit_id: &str,
        resolution: Resolution,
    ) -> Result<bool, MigrationError> {
        let unit = self.units.get(unit_id).ok_or_else(|| MigrationError::UnknownUnit {
            unit_id: unit_id.to_string(),
        })?;

        match resolution {
            Resolution::Applied => {
                let mut record = ApplicationRecord::applied(unit.id(), unit.description());
                record.resolved = true;
                self.changelog.record_applied(store, &record).await?;
                info!("resolved {unit_id} as applied");
                Ok(true)
            }
            Resolution::RolledBack => {
                let existed = self.changelog.mark_reverted(store, unit_id, true).await?;
                info!("resolved {unit_id} as rolled back");
                Ok(existed)
            }
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
