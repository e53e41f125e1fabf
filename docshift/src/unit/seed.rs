use async_trait::async_trait;
use log::debug;

use super::{MigrationUnit, Reverted, UnitReport};
use crate::document::Document;
use crate::errors::UnitError;
use crate::filter::Filter;
use crate::store::DocumentStore;

/// Inserts a fixed set of documents keyed by id.
///
/// Forward inserts only the ids not already present and never touches existing
/// documents. Backward deletes the whole id set.
#[derive(Debug, Clone)]
pub struct SeedUnit {
    id: String,
    description: String,
    collection: String,
    documents: Vec<Document>,
}

impl SeedUnit {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        documents: Vec<Document>,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            collection: collection.into(),
            documents,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    fn id_filter(&self) -> Filter {
        Filter::id_in(self.documents.iter().map(|doc| doc.id().to_string()))
    }
}

#[async_trait]
impl MigrationUnit for SeedUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError> {
        let existing = store.find(&self.collection, &self.id_filter()).await?;
        let missing: Vec<Document> = self
            .documents
            .iter()
            .filter(|doc| !existing.iter().any(|found| found.id() == doc.id()))
            .cloned()
            .collect();

        debug!(
            "{}: {} seed document(s) present, {} to insert",
            self.id,
            existing.len(),
            missing.len()
        );
        if missing.is_empty() {
            return Ok(UnitReport::default());
        }
        let inserted = store.insert_many(&self.collection, missing).await?;
        Ok(UnitReport::inserted(inserted))
    }

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError> {
        let deleted = store.delete_many(&self.collection, &self.id_filter()).await?;
        Ok(Reverted::Restored(UnitReport::deleted(deleted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn questions() -> Vec<Document> {
        ["q1", "q2", "q3"]
            .into_iter()
            .map(|id| Document::new(id).with("prompt", format!("Question {id}")))
            .collect()
    }

    #[tokio::test]
    async fn second_forward_inserts_nothing() {
        let store = MemoryStore::new("app_test");
        let unit = SeedUnit::new("20230105120000_seed_questions", "questions", questions());

        assert_eq!(unit.forward(&store).await.unwrap().inserted, 3);
        assert_eq!(unit.forward(&store).await.unwrap(), UnitReport::default());
        assert_eq!(store.snapshot("questions").len(), 3);
    }

    #[tokio::test]
    async fn backward_deletes_only_seeded_ids() {
        let store =
            MemoryStore::new("app_test").with_documents("questions", vec![Document::new("custom")]);
        let unit = SeedUnit::new("20230105120000_seed_questions", "questions", questions());
        unit.forward(&store).await.unwrap();

        let outcome = unit.backward(&store).await.unwrap();
        assert_eq!(outcome, Reverted::Restored(UnitReport::deleted(3)));
        assert_eq!(store.snapshot("questions"), vec![Document::new("custom")]);
    }
}
