//! In-process document store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use super::{DocumentStore, IndexSpec, WriteResult};
use crate::document::Document;
use crate::errors::StoreError;
use crate::filter::Filter;
use crate::update::Update;

#[derive(Debug, Default, Clone)]
struct MemoryCollection {
    documents: BTreeMap<String, Document>,
    indexes: BTreeMap<String, IndexSpec>,
}

/// A document store held entirely in memory.
///
/// Every mutating call increments a write counter, which tests use to assert
/// that an operation performed no writes at all.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    collections: Mutex<BTreeMap<String, MemoryCollection>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Mutex::new(BTreeMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of mutating calls made so far, including ones that changed nothing.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed a collection without counting writes.
    pub fn with_documents(
        self,
        collection: &str,
        documents: impl IntoIterator<Item = Document>,
    ) -> Self {
        {
            let mut collections = self.lock();
            let target = collections.entry(collection.to_string()).or_default();
            for doc in documents {
                target.documents.insert(doc.id().to_string(), doc);
            }
        }
        self
    }

    /// Snapshot of a collection, ordered by id.
    pub fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct lookup by id.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock().get(collection).and_then(|c| c.documents.get(id).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, MemoryCollection>> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.collections.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn apply_update(collection: &str, doc: &mut Document, update: &Update) -> Result<bool, StoreError> {
    update.apply(doc).map_err(|source| StoreError::Update {
        collection: collection.to_string(),
        id: doc.id().to_string(),
        source,
    })
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .lock()
            .get(collection)
            .map(|c| c.documents.values().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.lock();
        let Some(target) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let range = match after {
            Some(after) => target
                .documents
                .range::<str, _>((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded)),
            None => target.documents.range::<str, _>(..),
        };
        Ok(range
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .get(collection)
            .map(|c| c.documents.values().filter(|doc| filter.matches(doc)).count() as u64)
            .unwrap_or(0))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteResult, StoreError> {
        self.record_write();
        let mut collections = self.lock();
        let mut result = WriteResult::default();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(result);
        };
        for doc in target.documents.values_mut() {
            if !filter.matches(doc) {
                continue;
            }
            result.matched += 1;
            if apply_update(collection, doc, update)? {
                result.modified += 1;
            }
        }
        Ok(result)
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        update: &Update,
    ) -> Result<WriteResult, StoreError> {
        self.record_write();
        let mut collections = self.lock();
        let Some(doc) = collections.get_mut(collection).and_then(|c| c.documents.get_mut(id)) else {
            return Ok(WriteResult::default());
        };
        let modified = apply_update(collection, doc, update)?;
        Ok(WriteResult {
            matched: 1,
            modified: u64::from(modified),
        })
    }

    async fn update_batch(
        &self,
        collection: &str,
        updates: &[(String, Update)],
    ) -> Result<WriteResult, StoreError> {
        self.record_write();
        let mut collections = self.lock();
        let mut result = WriteResult::default();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(result);
        };
        for (id, update) in updates {
            if let Some(doc) = target.documents.get_mut(id) {
                result.matched += 1;
                if apply_update(collection, doc, update)? {
                    result.modified += 1;
                }
            }
        }
        Ok(result)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, StoreError> {
        self.record_write();
        let mut collections = self.lock();
        let target = collections.entry(collection.to_string()).or_default();
        let mut inserted = 0;
        for doc in documents {
            if target.documents.contains_key(doc.id()) {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id: doc.id().to_string(),
                });
            }
            target.documents.insert(doc.id().to_string(), doc);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        self.record_write();
        let mut collections = self.lock();
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = target.documents.len();
        target.documents.retain(|_, doc| !filter.matches(doc));
        Ok((before - target.documents.len()) as u64)
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.record_write();
        let mut collections = self.lock();
        if collections.get(to).is_some_and(|c| !c.documents.is_empty()) {
            return Err(StoreError::CollectionExists(to.to_string()));
        }
        let source = collections
            .remove(from)
            .ok_or_else(|| StoreError::CollectionNotFound(from.to_string()))?;
        collections.insert(to.to_string(), source);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        self.record_write();
        Ok(self.lock().remove(name).is_some())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.record_write();
        let mut collections = self.lock();
        let target = collections.entry(collection.to_string()).or_default();
        if target.indexes.contains_key(&index.name) {
            return Err(StoreError::IndexExists {
                collection: collection.to_string(),
                index: index.name.clone(),
            });
        }
        target.indexes.insert(index.name.clone(), index.clone());
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<bool, StoreError> {
        self.record_write();
        Ok(self
            .lock()
            .get_mut(collection)
            .is_some_and(|c| c.indexes.remove(name).is_some()))
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        Ok(self
            .lock()
            .get(collection)
            .map(|c| c.indexes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn sample(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let matching = self.find(collection, filter).await?;
        let mut rng = rand::thread_rng();
        let mut picked: Vec<Document> = matching.choose_multiple(&mut rng, size).cloned().collect();
        picked.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn brands() -> Vec<Document> {
        (1..=5)
            .map(|n| Document::new(format!("b{n}")).with("name", format!("Brand {n}")))
            .collect()
    }

    #[tokio::test]
    async fn pages_are_ordered_and_bounded() {
        let store = MemoryStore::new("app_test").with_documents("brands", brands());
        let first = store.find_page("brands", &Filter::All, None, 2).await.unwrap();
        assert_eq!(
            first.iter().map(Document::id).collect::<Vec<_>>(),
            ["b1", "b2"]
        );
        let next = store.find_page("brands", &Filter::All, Some("b2"), 10).await.unwrap();
        assert_eq!(
            next.iter().map(Document::id).collect::<Vec<_>>(),
            ["b3", "b4", "b5"]
        );
    }

    #[tokio::test]
    async fn seeding_does_not_count_as_writes() {
        let store = MemoryStore::new("app_test").with_documents("brands", brands());
        assert_eq!(store.write_count(), 0);
        store.delete_many("brands", &Filter::id_in(["b1"])).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = MemoryStore::new("app_test").with_documents("brands", brands());
        let err = store
            .insert_many("brands", vec![Document::new("b9"), Document::new("b1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { ref id, .. } if id == "b1"));
    }

    #[tokio::test]
    async fn update_many_counts_matched_and_modified() {
        let store = MemoryStore::new("app_test").with_documents(
            "deals",
            vec![
                Document::from_fields("d1", json!({"active": true})),
                Document::from_fields("d2", json!({"active": false})),
                Document::from_fields("d3", json!({})),
            ],
        );
        let result = store
            .update_many(
                "deals",
                &Filter::exists("active"),
                &Update::new().set("active", true),
            )
            .await
            .unwrap();
        assert_eq!(result, WriteResult { matched: 2, modified: 1 });
    }

    #[tokio::test]
    async fn rename_refuses_to_overwrite() {
        let store = MemoryStore::new("app_test")
            .with_documents("brands", brands())
            .with_documents("labels", vec![Document::new("l1")]);
        let err = store.rename_collection("brands", "labels").await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionExists(_)));

        store.rename_collection("labels", "tags").await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), ["brands", "tags"]);
    }

    #[tokio::test]
    async fn sample_is_bounded_subset() {
        let store = MemoryStore::new("app_test").with_documents("brands", brands());
        let picked = store.sample("brands", &Filter::All, 3).await.unwrap();
        assert_eq!(picked.len(), 3);
        let all = store.sample("brands", &Filter::All, 50).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn index_lifecycle() {
        let store = MemoryStore::new("app_test");
        let index = IndexSpec::new("deals_brand", "brandId", crate::store::IndexKind::Tag);
        store.create_index("deals", &index).await.unwrap();
        assert!(store.create_index("deals", &index).await.is_err());
        assert_eq!(store.list_indexes("deals").await.unwrap(), vec![index]);
        assert!(store.drop_index("deals", "deals_brand").await.unwrap());
        assert!(!store.drop_index("deals", "deals_brand").await.unwrap());
    }
}
