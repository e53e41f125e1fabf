//! Migration engine: planning, execution and changelog tracking.
//!
//! This module provides:
//! - `plan_up` / `plan_down` / `plan` - pure ordering and prefix checks
//! - `Changelog` / `ApplicationRecord` - durable per-unit state
//! - `Migrator` - applies, reverts, runs and resolves units against a store

mod plan;
mod runner;
mod state;

pub use self::plan::{Direction, Target, plan, plan_down, plan_up};
pub use self::runner::{
    Migrator, Resolution, RevertOutcome, RunStats, RunSummary, StatusReport, UnitState, UnitStatus,
};
pub use self::state::{ApplicationRecord, Changelog, DEFAULT_CHANGELOG_COLLECTION, RecordDirection};
