//! Refuses destructive units against stores that are not test instances.

use crate::errors::MigrationError;
use crate::store::DocumentStore;
use crate::unit::MigrationUnit;

/// Substring a store name must contain before destructive units may run.
pub const DEFAULT_TEST_MARKER: &str = "test";

#[derive(Debug, Clone)]
pub struct Guard {
    test_marker: String,
}

impl Default for Guard {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_MARKER)
    }
}

impl Guard {
    pub fn new(test_marker: impl Into<String>) -> Self {
        Self {
            test_marker: test_marker.into(),
        }
    }

    pub fn test_marker(&self) -> &str {
        &self.test_marker
    }

    pub fn is_test_store(&self, store: &dyn DocumentStore) -> bool {
        !self.test_marker.is_empty() && store.name().contains(&self.test_marker)
    }

    /// Check a unit before any of its procedures touch the store.
    pub fn check(
        &self,
        unit: &dyn MigrationUnit,
        store: &dyn DocumentStore,
    ) -> Result<(), MigrationError> {
        if unit.is_destructive() && !self.is_test_store(store) {
            return Err(MigrationError::GuardRejected {
                unit_id: unit.id().to_string(),
                store: store.name().to_string(),
                marker: self.test_marker.clone(),
            });
        }
        Ok(())
    }
}
