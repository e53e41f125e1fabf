//! Document store abstraction the engine and units run against.
//!
//! This module provides:
//! - `DocumentStore` - async, object-safe collection operations
//! - `MemoryStore` - in-process store with a write counter, for tests and dry experiments
//! - `RedisStore` - RedisJSON documents with RediSearch indexes
//! - `connect` - opens a store from a `redis://` or `memory://` url

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::document::Document;
use crate::errors::StoreError;
use crate::filter::Filter;
use crate::update::Update;

/// Counts reported by write operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Documents selected by the filter or id
    pub matched: u64,
    /// Documents whose content actually changed
    pub modified: u64,
}

impl WriteResult {
    pub fn merge(&mut self, other: WriteResult) {
        self.matched += other.matched;
        self.modified += other.modified;
    }
}

/// Kind of a secondary index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Tag,
    Text,
    Numeric,
}

/// Secondary index over one document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub kind: IndexKind,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, field: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            kind,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Operations a migration may perform against a document database.
///
/// Every call is individually atomic only at single-document granularity.
/// Multi-document operations may partially apply before an error is returned.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Database name; destructive units consult it before running.
    fn name(&self) -> &str;

    /// Every matching document, ordered by id.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Up to `limit` matching documents with ids strictly greater than `after`, ordered by id.
    async fn find_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Apply `update` to every matching document.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteResult, StoreError>;

    /// Apply `update` to the document with `id`, if present.
    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        update: &Update,
    ) -> Result<WriteResult, StoreError>;

    /// Apply distinct updates to distinct documents in one round trip where the backend allows it.
    async fn update_batch(
        &self,
        collection: &str,
        updates: &[(String, Update)],
    ) -> Result<WriteResult, StoreError>;

    /// Insert documents; fails with `DuplicateId` on the first existing id.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Rename a collection; fails if `to` already holds documents.
    async fn rename_collection(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Drop a collection and its indexes. Returns whether it existed.
    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    /// Returns whether the index existed.
    async fn drop_index(&self, collection: &str, name: &str) -> Result<bool, StoreError>;

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError>;

    /// Up to `size` matching documents chosen uniformly at random.
    async fn sample(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<Document>, StoreError>;
}

/// Open a store from a connection url.
///
/// - `redis://host:port/` opens a [`RedisStore`] whose keys are prefixed with `database`
/// - `memory://` opens an empty [`MemoryStore`] named `database`
pub async fn connect(url: &str, database: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let parsed = Url::parse(url).map_err(|_| StoreError::UnsupportedUrl(url.to_string()))?;
    match parsed.scheme() {
        "redis" | "rediss" => {
            let store = RedisStore::connect(url, database).await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryStore::new(database))),
        _ => Err(StoreError::UnsupportedUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_memory_url() {
        let store = connect("memory://", "brandshop_test").await.unwrap();
        assert_eq!(store.name(), "brandshop_test");
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn connect_rejects_unknown_scheme() {
        let err = connect("mongodb://localhost:27017", "app").await.err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedUrl(_)));
    }

    #[tokio::test]
    async fn connect_rejects_garbage() {
        assert!(connect("not a url", "app").await.is_err());
    }

    #[test]
    fn write_results_merge() {
        let mut total = WriteResult::default();
        total.merge(WriteResult { matched: 3, modified: 2 });
        total.merge(WriteResult { matched: 1, modified: 1 });
        assert_eq!(total, WriteResult { matched: 4, modified: 3 });
    }
}
