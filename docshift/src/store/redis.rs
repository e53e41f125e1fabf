//! Redis Stack document store: RedisJSON documents, RediSearch secondary indexes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use rand::seq::SliceRandom;
use redis::aio::ConnectionManager;
use serde_json::Value;

use super::{DocumentStore, IndexKind, IndexSpec, WriteResult};
use crate::document::Document;
use crate::errors::StoreError;
use crate::filter::Filter;
use crate::keys::KeyContext;
use crate::update::Update;

/// Keys requested per SCAN step, and the largest id page read from the id index.
const SCAN_COUNT: usize = 1000;

/// Document store backed by Redis Stack.
///
/// Each collection keeps a sorted set of its document ids next to the documents,
/// so traversal reads id-ordered pages with `ZRANGEBYLEX` instead of scanning the
/// keyspace. The set is backfilled with one SCAN the first time this store
/// touches a collection, which picks up documents written by the application
/// itself. Filters and update expressions are evaluated client-side, one bounded
/// page at a time.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    database: String,
    synced: Arc<Mutex<HashSet<String>>>,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, database: impl Into<String>) -> Self {
        Self {
            conn,
            database: database.into(),
            synced: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Connect to Redis and scope every key under `database`.
    pub async fn connect(url: &str, database: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, database))
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.database)
    }

    fn synced(&self) -> MutexGuard<'_, HashSet<String>> {
        self.synced.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Backfill the id index from the keyspace, once per collection.
    async fn sync_ids(&self, collection: &str) -> Result<(), StoreError> {
        if self.synced().contains(collection) {
            return Ok(());
        }
        let keys = self.keys();
        let pattern = keys.collection_pattern(collection);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = 0usize;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            let ids: Vec<&str> = batch
                .iter()
                .filter_map(|key| keys.document_id(collection, key))
                .filter(|id| !id.is_empty())
                .collect();
            if !ids.is_empty() {
                found += ids.len();
                let mut command = redis::cmd("ZADD");
                command.arg(keys.id_index(collection));
                for id in &ids {
                    command.arg(0).arg(*id);
                }
                command.query_async::<()>(&mut conn).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!("indexed {found} id(s) for {}:{collection}", self.database);
        self.synced().insert(collection.to_string());
        Ok(())
    }

    /// Up to `limit` ids after `after`, in byte order.
    async fn id_page(
        &self,
        collection: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.sync_ids(collection).await?;
        let min = match after {
            Some(id) => format!("({id}"),
            None => "-".to_string(),
        };
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZRANGEBYLEX")
            .arg(self.keys().id_index(collection))
            .arg(min)
            .arg("+")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn id_count(&self, collection: &str) -> Result<u64, StoreError> {
        self.sync_ids(collection).await?;
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCARD")
            .arg(self.keys().id_index(collection))
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Fetch documents by id, skipping ids deleted in the meantime.
    async fn fetch(&self, collection: &str, ids: &[String]) -> Result<Vec<Document>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys = self.keys();
        let doc_keys: Vec<String> = ids.iter().map(|id| keys.document(collection, id)).collect();
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("JSON.MGET")
            .arg(&doc_keys)
            .arg("$")
            .query_async(&mut conn)
            .await?;

        let mut documents = Vec::with_capacity(raw.len());
        for (id, json) in ids.iter().zip(raw) {
            let Some(json) = json else { continue };
            // JSON.MGET with a `$` path wraps each document in an array
            let values: Vec<Value> = serde_json::from_str(&json)?;
            if let Some(value) = values.into_iter().next() {
                documents.push(Document::from_fields(id.clone(), value));
            }
        }
        Ok(documents)
    }

    /// Matching documents from the id page after `after`, plus the cursor for
    /// the next page (`None` once the index is exhausted).
    async fn matching_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&str>,
        chunk: usize,
    ) -> Result<(Vec<Document>, Option<String>), StoreError> {
        let ids = self.id_page(collection, after, chunk).await?;
        let next = match ids.last() {
            Some(last) if ids.len() == chunk => Some(last.clone()),
            _ => None,
        };
        let matching = self
            .fetch(collection, &ids)
            .await?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect();
        Ok((matching, next))
    }

    async fn write_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let keys = self.keys();
        let mut pipe = redis::pipe();
        for doc in documents {
            let json = serde_json::to_string(&doc.to_value())?;
            pipe.cmd("JSON.SET")
                .arg(keys.document(collection, doc.id()))
                .arg("$")
                .arg(json)
                .ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Delete documents and their id index entries.
    async fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let keys = self.keys();
        let doc_keys: Vec<String> = ids.iter().map(|id| keys.document(collection, id)).collect();
        let mut conn = self.conn.clone();
        let (deleted, _): (u64, u64) = redis::pipe()
            .cmd("DEL")
            .arg(&doc_keys)
            .cmd("ZREM")
            .arg(keys.id_index(collection))
            .arg(ids)
            .query_async(&mut conn)
            .await?;
        Ok(deleted)
    }

    async fn register_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(self.keys().collections())
            .arg(collection)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn create_search_index(
        &self,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), StoreError> {
        let keys = self.keys();
        let mut command = redis::cmd("FT.CREATE");
        command
            .arg(keys.search_index(collection, &index.name))
            .arg("ON")
            .arg("JSON")
            .arg("PREFIX")
            .arg(1)
            .arg(keys.collection_prefix(collection))
            .arg("SCHEMA")
            .arg(format!("$.{}", index.field))
            .arg("AS")
            .arg(index.field.replace('.', "_"));
        command.arg(match index.kind {
            IndexKind::Tag => "TAG",
            IndexKind::Text => "TEXT",
            IndexKind::Numeric => "NUMERIC",
        });

        let mut conn = self.conn.clone();
        if let Err(err) = command.query_async::<()>(&mut conn).await {
            if !index_exists_error(&err) {
                return Err(err.into());
            }
        }
        Ok(())
    }

    async fn drop_search_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let result = redis::cmd("FT.DROPINDEX")
            .arg(self.keys().search_index(collection, name))
            .query_async::<()>(&mut conn)
            .await;
        match result {
            Err(err) if !unknown_index_error(&err) => Err(err.into()),
            _ => Ok(()),
        }
    }
}

fn index_exists_error(err: &redis::RedisError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("already exists") && msg.contains("index")
}

fn unknown_index_error(err: &redis::RedisError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("unknown index") || msg.contains("no such index")
}

#[async_trait]
impl DocumentStore for RedisStore {
    fn name(&self) -> &str {
        &self.database
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let mut found = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let (matching, next) = self
                .matching_page(collection, filter, after.as_deref(), SCAN_COUNT)
                .await?;
            found.extend(matching);
            match next {
                Some(next) => after = Some(next),
                None => return Ok(found),
            }
        }
    }

    async fn find_page(
        &self,
        collection: &str,
        filter: &Filter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        // Reads never run further ahead than one page's worth of ids.
        let chunk = limit.clamp(1, SCAN_COUNT);
        let mut page = Vec::new();
        let mut after = after.map(str::to_string);
        loop {
            let (matching, next) = self
                .matching_page(collection, filter, after.as_deref(), chunk)
                .await?;
            for doc in matching {
                if page.len() >= limit {
                    return Ok(page);
                }
                page.push(doc);
            }
            match next {
                Some(next) if page.len() < limit => after = Some(next),
                _ => return Ok(page),
            }
        }
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        if matches!(filter, Filter::All) {
            return self.id_count(collection).await;
        }
        let mut count = 0;
        let mut after: Option<String> = None;
        loop {
            let (matching, next) = self
                .matching_page(collection, filter, after.as_deref(), SCAN_COUNT)
                .await?;
            count += matching.len() as u64;
            match next {
                Some(next) => after = Some(next),
                None => return Ok(count),
            }
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteResult, StoreError> {
        let mut result = WriteResult::default();
        let mut after: Option<String> = None;

        loop {
            let (matching, next) = self
                .matching_page(collection, filter, after.as_deref(), SCAN_COUNT)
                .await?;
            let mut changed = Vec::new();
            for mut doc in matching {
                result.matched += 1;
                let modified = update.apply(&mut doc).map_err(|source| StoreError::Update {
                    collection: collection.to_string(),
                    id: doc.id().to_string(),
                    source,
                })?;
                if modified {
                    changed.push(doc);
                }
            }
            result.modified += changed.len() as u64;
            self.write_documents(collection, &changed).await?;

            match next {
                Some(next) => after = Some(next),
                None => break,
            }
        }

        debug!(
            "update_many {}:{} matched={} modified={}",
            self.database, collection, result.matched, result.modified
        );
        Ok(result)
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &str,
        update: &Update,
    ) -> Result<WriteResult, StoreError> {
        self.update_batch(collection, &[(id.to_string(), update.clone())]).await
    }

    async fn update_batch(
        &self,
        collection: &str,
        updates: &[(String, Update)],
    ) -> Result<WriteResult, StoreError> {
        let ids: Vec<String> = updates.iter().map(|(id, _)| id.clone()).collect();
        let mut by_id: HashMap<String, Document> = self
            .fetch(collection, &ids)
            .await?
            .into_iter()
            .map(|doc| (doc.id().to_string(), doc))
            .collect();

        let mut result = WriteResult::default();
        let mut changed_ids = Vec::new();
        for (id, update) in updates {
            let Some(doc) = by_id.get_mut(id) else { continue };
            result.matched += 1;
            let modified = update.apply(doc).map_err(|source| StoreError::Update {
                collection: collection.to_string(),
                id: id.clone(),
                source,
            })?;
            if modified {
                result.modified += 1;
                changed_ids.push(id.as_str());
            }
        }

        let changed: Vec<Document> = changed_ids
            .into_iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        self.write_documents(collection, &changed).await?;
        Ok(result)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, StoreError> {
        if documents.is_empty() {
            return Ok(0);
        }
        self.register_collection(collection).await?;

        let keys = self.keys();
        let mut conn = self.conn.clone();
        let mut inserted = 0;
        for doc in documents {
            let json = serde_json::to_string(&doc.to_value())?;
            let created: Option<String> = redis::cmd("JSON.SET")
                .arg(keys.document(collection, doc.id()))
                .arg("$")
                .arg(json)
                .arg("NX")
                .query_async(&mut conn)
                .await?;
            if created.is_none() {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id: doc.id().to_string(),
                });
            }
            let _: u64 = redis::cmd("ZADD")
                .arg(keys.id_index(collection))
                .arg(0)
                .arg(doc.id())
                .query_async(&mut conn)
                .await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut deleted = 0;
        if matches!(filter, Filter::All) {
            // Deleting from the front of the index moves the next page up.
            loop {
                let ids = self.id_page(collection, None, SCAN_COUNT).await?;
                if ids.is_empty() {
                    return Ok(deleted);
                }
                deleted += self.delete_ids(collection, &ids).await?;
            }
        }

        let mut after: Option<String> = None;
        loop {
            let (matching, next) = self
                .matching_page(collection, filter, after.as_deref(), SCAN_COUNT)
                .await?;
            let ids: Vec<String> = matching.iter().map(|doc| doc.id().to_string()).collect();
            deleted += self.delete_ids(collection, &ids).await?;
            match next {
                Some(next) => after = Some(next),
                None => return Ok(deleted),
            }
        }
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<(), StoreError> {
        if self.id_count(to).await? > 0 {
            return Err(StoreError::CollectionExists(to.to_string()));
        }
        if !self.list_collections().await?.iter().any(|name| name == from) {
            return Err(StoreError::CollectionNotFound(from.to_string()));
        }

        let keys = self.keys();
        let indexes = self.list_indexes(from).await?;
        for index in &indexes {
            self.drop_search_index(from, &index.name).await?;
        }

        let mut conn = self.conn.clone();
        let mut after: Option<String> = None;
        loop {
            let ids = self.id_page(from, after.as_deref(), SCAN_COUNT).await?;
            if ids.is_empty() {
                break;
            }
            let mut pipe = redis::pipe();
            for id in &ids {
                pipe.cmd("RENAME")
                    .arg(keys.document(from, id))
                    .arg(keys.document(to, id))
                    .ignore();
            }
            pipe.query_async::<()>(&mut conn).await?;
            match ids.last() {
                Some(last) if ids.len() == SCAN_COUNT => after = Some(last.clone()),
                _ => break,
            }
        }

        let has_ids: bool = redis::cmd("EXISTS")
            .arg(keys.id_index(from))
            .query_async(&mut conn)
            .await?;
        let mut pipe = redis::pipe();
        pipe.cmd("DEL")
            .arg(keys.index_specs(to))
            .ignore()
            .cmd("DEL")
            .arg(keys.id_index(to))
            .ignore()
            .cmd("SREM")
            .arg(keys.collections())
            .arg(from)
            .ignore()
            .cmd("SADD")
            .arg(keys.collections())
            .arg(to)
            .ignore()
            .cmd("DEL")
            .arg(keys.index_specs(from))
            .ignore();
        if has_ids {
            pipe.cmd("RENAME")
                .arg(keys.id_index(from))
                .arg(keys.id_index(to))
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        {
            let mut synced = self.synced();
            synced.remove(from);
            synced.insert(to.to_string());
        }

        for index in &indexes {
            self.create_index(to, index).await?;
        }
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, StoreError> {
        let keys = self.keys();
        for index in self.list_indexes(name).await? {
            self.drop_search_index(name, &index.name).await?;
        }
        self.delete_many(name, &Filter::All).await?;

        let mut conn = self.conn.clone();
        let (_, _, removed): (u64, u64, u64) = redis::pipe()
            .cmd("DEL")
            .arg(keys.index_specs(name))
            .cmd("DEL")
            .arg(keys.id_index(name))
            .cmd("SREM")
            .arg(keys.collections())
            .arg(name)
            .query_async(&mut conn)
            .await?;
        self.synced().remove(name);
        Ok(removed > 0)
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.keys().collections())
            .query_async(&mut conn)
            .await?;
        names.sort();
        Ok(names)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let spec = serde_json::to_string(index)?;
        let mut conn = self.conn.clone();
        let created: bool = redis::cmd("HSETNX")
            .arg(self.keys().index_specs(collection))
            .arg(&index.name)
            .arg(spec)
            .query_async(&mut conn)
            .await?;
        if !created {
            return Err(StoreError::IndexExists {
                collection: collection.to_string(),
                index: index.name.clone(),
            });
        }
        self.register_collection(collection).await?;
        self.create_search_index(collection, index).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("HDEL")
            .arg(self.keys().index_specs(collection))
            .arg(name)
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Ok(false);
        }
        self.drop_search_index(collection, name).await?;
        Ok(true)
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys().index_specs(collection))
            .query_async(&mut conn)
            .await?;
        let mut specs = raw
            .values()
            .map(|json| serde_json::from_str::<IndexSpec>(json))
            .collect::<Result<Vec<_>, _>>()?;
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    async fn sample(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let mut picked = if matches!(filter, Filter::All) {
            self.sync_ids(collection).await?;
            let mut conn = self.conn.clone();
            let chosen: Vec<String> = redis::cmd("ZRANDMEMBER")
                .arg(self.keys().id_index(collection))
                .arg(size)
                .query_async(&mut conn)
                .await?;
            self.fetch(collection, &chosen).await?
        } else {
            let matching = self.find(collection, filter).await?;
            let mut rng = rand::thread_rng();
            matching.choose_multiple(&mut rng, size).cloned().collect()
        };
        picked.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(picked)
    }
}
