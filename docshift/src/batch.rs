//! Bounded-memory traversal and buffered writes for units that need
//! inter-document computation.

use log::debug;

use crate::document::Document;
use crate::errors::{StoreError, UnitError};
use crate::filter::Filter;
use crate::store::{DocumentStore, WriteResult};
use crate::update::Update;

/// Default number of documents per read page and per write batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Id-ordered pages over the documents matching a filter.
///
/// Each page resumes after the last id seen, so documents modified between
/// pages are neither skipped nor revisited.
pub struct BatchCursor<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    filter: Filter,
    batch_size: usize,
    after: Option<String>,
    exhausted: bool,
}

impl<'a> BatchCursor<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        collection: impl Into<String>,
        filter: Filter,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            filter,
            batch_size: DEFAULT_BATCH_SIZE,
            after: None,
            exhausted: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Next page, or `None` once the cursor is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Document>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .store
            .find_page(
                &self.collection,
                &self.filter,
                self.after.as_deref(),
                self.batch_size,
            )
            .await?;

        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.after = Some(last.id().to_string());
                Ok(Some(page))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}

/// Buffers per-document updates and flushes them every `batch_size` entries.
pub struct BulkWriter<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    batch_size: usize,
    pending: Vec<(String, Update)>,
    result: WriteResult,
}

impl<'a> BulkWriter<'a> {
    pub fn new(store: &'a dyn DocumentStore, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            pending: Vec::new(),
            result: WriteResult::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub async fn push(&mut self, id: impl Into<String>, update: Update) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        self.pending.push((id.into(), update));
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let result = self.store.update_batch(&self.collection, &batch).await?;
        debug!(
            "flushed {} update(s) to '{}': matched={} modified={}",
            batch.len(),
            self.collection,
            result.matched,
            result.modified
        );
        self.result.merge(result);
        Ok(())
    }

    /// Flush the remainder and return the accumulated counts.
    pub async fn finish(mut self) -> Result<WriteResult, StoreError> {
        self.flush().await?;
        Ok(self.result)
    }
}

/// Load every matching document, refusing collections above `limit`.
///
/// Only for small lookup collections (brands, categories); anything that can
/// grow unbounded goes through [`BatchCursor`].
pub async fn load_small(
    store: &dyn DocumentStore,
    collection: &str,
    filter: &Filter,
    limit: u64,
) -> Result<Vec<Document>, UnitError> {
    let count = store.count(collection, filter).await?;
    if count > limit {
        return Err(UnitError::CollectionTooLarge {
            collection: collection.to_string(),
            count,
            limit,
        });
    }
    Ok(store.find(collection, filter).await?)
}
