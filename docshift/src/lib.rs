//! docshift: ordered, reversible migrations for schema-less document stores.
//!
//! A migration is a [`unit::MigrationUnit`] with a sortable id, a `forward`
//! procedure and a `backward` procedure. The [`engine::Migrator`] keeps one
//! [`engine::ApplicationRecord`] per unit in a changelog collection and only
//! ever applies a prefix of the id-ordered unit list.
//!
//! Units are usually built from declarative [`unit::Step`]s or as
//! [`unit::SeedUnit`]s, and registered with [`register_unit!`] so a binary can
//! collect them with [`unit::UnitSet::from_inventory`] and hand them to
//! [`cli::run`].

pub mod batch;
pub mod cli;
pub mod document;
pub mod engine;
pub mod errors;
pub mod filter;
pub mod guard;
pub mod id;
pub mod keys;
pub mod store;
pub mod two_phase;
pub mod unit;
pub mod update;

pub use document::{Document, ValueType};
pub use engine::{Direction, Migrator, RunSummary, Target};
pub use errors::{MigrationError, StoreError, UnitError, UpdateError};
pub use filter::Filter;
pub use store::{DocumentStore, MemoryStore, RedisStore};
pub use unit::{MigrationUnit, Reversibility, Reverted, UnitReport, UnitSet};
pub use update::{Expr, Update};

// Re-exported for `register_unit!`
pub use inventory;
