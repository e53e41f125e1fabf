/// Key-construction helpers for the Redis document layout.
///
/// Layout under a database prefix:
/// - `{db}:{collection}:{id}` - one RedisJSON document
/// - `{db}:_collections` - set of collection names
/// - `{db}:_indexes:{collection}` - hash of index name to serialized index spec
/// - `{db}:_ids:{collection}` - sorted set of document ids, all scored 0 for lex paging
/// - `{db}:idx:{collection}:{index}` - RediSearch index name
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub database: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(database: &'a str) -> Self {
        Self { database }
    }

    pub fn document(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.database, collection, id)
    }

    /// Prefix shared by every document key of a collection.
    pub fn collection_prefix(&self, collection: &str) -> String {
        format!("{}:{}:", self.database, collection)
    }

    pub fn collection_pattern(&self, collection: &str) -> String {
        format!("{}*", self.collection_prefix(collection))
    }

    pub fn collections(&self) -> String {
        format!("{}:_collections", self.database)
    }

    pub fn index_specs(&self, collection: &str) -> String {
        format!("{}:_indexes:{}", self.database, collection)
    }

    pub fn id_index(&self, collection: &str) -> String {
        format!("{}:_ids:{}", self.database, collection)
    }

    pub fn search_index(&self, collection: &str, index: &str) -> String {
        format!("{}:idx:{}:{}", self.database, collection, index)
    }

    /// Recover a document id from its key.
    pub fn document_id<'k>(&self, collection: &str, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(&self.collection_prefix(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_document_keys() {
        let ctx = KeyContext::new("brandshop");
        assert_eq!(ctx.document("brands", "abc"), "brandshop:brands:abc");
        assert_eq!(ctx.collection_pattern("brands"), "brandshop:brands:*");
        assert_eq!(
            ctx.search_index("deals", "by_brand"),
            "brandshop:idx:deals:by_brand"
        );
        assert_eq!(ctx.id_index("deals"), "brandshop:_ids:deals");
    }

    #[test]
    fn recovers_ids_with_colons() {
        let ctx = KeyContext::new("brandshop");
        assert_eq!(
            ctx.document_id("codeGroups", "brandshop:codeGroups:deal:d1"),
            Some("deal:d1")
        );
        assert_eq!(ctx.document_id("brands", "brandshop:deals:d1"), None);
    }
}
