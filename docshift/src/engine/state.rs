//! Application records kept in the changelog collection.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::errors::StoreError;
use crate::filter::Filter;
use crate::store::DocumentStore;
use crate::update::Update;

/// Default name of the reserved changelog collection.
pub const DEFAULT_CHANGELOG_COLLECTION: &str = "changelog";

/// Whether a unit's data changes are currently in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordDirection {
    Applied,
    Reverted,
}

impl RecordDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordDirection::Applied => "applied",
            RecordDirection::Reverted => "reverted",
        }
    }
}

/// One changelog document, keyed by unit id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub unit_id: String,
    pub applied_at: DateTime<Utc>,
    pub direction: RecordDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub documents_affected: u64,
    #[serde(default)]
    pub description: String,
    /// Set when an operator changed the state without running the unit.
    #[serde(default)]
    pub resolved: bool,
}

impl ApplicationRecord {
    pub fn applied(unit_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            applied_at: Utc::now(),
            direction: RecordDirection::Applied,
            reverted_at: None,
            execution_time_ms: 0,
            documents_affected: 0,
            description: description.into(),
            resolved: false,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.direction == RecordDirection::Applied
    }

    fn to_update(&self) -> Result<Update, StoreError> {
        let value = serde_json::to_value(self)?;
        let mut update = Update::new();
        if let Some(fields) = value.as_object() {
            for (field, value) in fields {
                update = update.set(field.as_str(), value.clone());
            }
        }
        if self.reverted_at.is_none() {
            update = update.unset("revertedAt");
        }
        Ok(update)
    }
}

/// Reads and writes application records. Only the engine writes here.
#[derive(Debug, Clone)]
pub struct Changelog {
    collection: String,
}

impl Default for Changelog {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGELOG_COLLECTION)
    }
}

impl Changelog {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Every record, ordered by unit id.
    pub async fn load(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<Vec<ApplicationRecord>, StoreError> {
        store
            .find(&self.collection, &Filter::All)
            .await?
            .into_iter()
            .map(|doc| Ok::<_, StoreError>(serde_json::from_value(doc.to_value())?))
            .collect()
    }

    pub async fn get(
        &self,
        store: &dyn DocumentStore,
        unit_id: &str,
    ) -> Result<Option<ApplicationRecord>, StoreError> {
        let found = store.find(&self.collection, &Filter::id_in([unit_id])).await?;
        found
            .into_iter()
            .next()
            .map(|doc| Ok::<_, StoreError>(serde_json::from_value(doc.to_value())?))
            .transpose()
    }

    /// Ids whose records say `applied`.
    pub async fn applied_ids(
        &self,
        store: &dyn DocumentStore,
    ) -> Result<BTreeSet<String>, StoreError> {
        Ok(store
            .find(
                &self.collection,
                &Filter::eq("direction", RecordDirection::Applied.as_str()),
            )
            .await?
            .into_iter()
            .map(|doc| doc.id().to_string())
            .collect())
    }

    /// Write or overwrite the record for `record.unit_id`.
    pub async fn record_applied(
        &self,
        store: &dyn DocumentStore,
        record: &ApplicationRecord,
    ) -> Result<(), StoreError> {
        let update = record.to_update()?;
        let result = store.update_one(&self.collection, &record.unit_id, &update).await?;
        if result.matched == 0 {
            let doc = Document::from_fields(record.unit_id.clone(), serde_json::to_value(record)?);
            store.insert_many(&self.collection, vec![doc]).await?;
        }
        debug!("changelog: {} recorded as applied", record.unit_id);
        Ok(())
    }

    /// Flag a record as reverted. Returns whether a record existed.
    pub async fn mark_reverted(
        &self,
        store: &dyn DocumentStore,
        unit_id: &str,
        resolved: bool,
    ) -> Result<bool, StoreError> {
        let mut update = Update::new()
            .set("direction", RecordDirection::Reverted.as_str())
            .set("revertedAt", serde_json::to_value(Utc::now())?);
        if resolved {
            update = update.set("resolved", true);
        }
        let result = store.update_one(&self.collection, unit_id, &update).await?;
        debug!("changelog: {unit_id} recorded as reverted");
        Ok(result.matched > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn record_serializes_camel_case() {
        let record = ApplicationRecord::applied("20230105120000_seed", "seed questions");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["unitId"], "20230105120000_seed");
        assert_eq!(json["direction"], "applied");
        assert!(json.get("revertedAt").is_none());
        assert_eq!(json["documentsAffected"], 0);
    }

    #[tokio::test]
    async fn applied_ids_follow_direction() {
        let store = MemoryStore::new("app_test");
        let changelog = Changelog::default();
        for id in ["20230101000000_a", "20230201000000_b"] {
            changelog
                .record_applied(&store, &ApplicationRecord::applied(id, ""))
                .await
                .unwrap();
        }
        assert!(changelog.mark_reverted(&store, "20230201000000_b", false).await.unwrap());
        assert!(!changelog.mark_reverted(&store, "20230301000000_c", false).await.unwrap());

        let applied = changelog.applied_ids(&store).await.unwrap();
        assert_eq!(
            applied.into_iter().collect::<Vec<_>>(),
            ["20230101000000_a"]
        );

        let reverted = changelog.get(&store, "20230201000000_b").await.unwrap().unwrap();
        assert_eq!(reverted.direction, RecordDirection::Reverted);
        assert!(reverted.reverted_at.is_some());
    }

    #[tokio::test]
    async fn reapplying_overwrites_the_record() {
        let store = MemoryStore::new("app_test");
        let changelog = Changelog::new("_migrations");
        let mut record = ApplicationRecord::applied("20230101000000_a", "first");
        changelog.record_applied(&store, &record).await.unwrap();
        changelog.mark_reverted(&store, "20230101000000_a", false).await.unwrap();

        record.documents_affected = 12;
        changelog.record_applied(&store, &record).await.unwrap();

        let records = changelog.load(&store).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_applied());
        assert_eq!(records[0].reverted_at, None);
        assert_eq!(records[0].documents_affected, 12);
    }
}
