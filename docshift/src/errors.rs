use std::borrow::Cow;

use thiserror::Error;

use crate::document::ValueType;

/// Top-level error type returned by the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The changelog disagrees with the known unit order.
    #[error("applied migrations are not a prefix of the known unit order: {detail}")]
    OutOfOrderState { detail: String },

    /// A revert asked for more units than are currently applied.
    #[error("cannot revert {requested} unit(s): only {applied} applied")]
    InvalidRevertCount { requested: usize, applied: usize },

    /// A unit's forward or backward procedure failed.
    #[error("unit '{unit_id}' failed: {source}")]
    UnitExecution {
        unit_id: String,
        #[source]
        source: UnitError,
    },

    /// A destructive unit refused to run against a store not marked as a test instance.
    #[error(
        "unit '{unit_id}' is destructive and store '{store}' is not marked as a test store \
         (marker '{marker}')"
    )]
    GuardRejected {
        unit_id: String,
        store: String,
        marker: String,
    },

    /// The unit cannot be reverted at all.
    #[error("unit '{unit_id}' is not reversible: {reason}")]
    NotReversible { unit_id: String, reason: String },

    /// A target id does not name a known unit.
    #[error("unknown migration unit '{unit_id}'")]
    UnknownUnit { unit_id: String },

    /// Two registered units share an id.
    #[error("duplicate migration unit id '{unit_id}'")]
    DuplicateUnit { unit_id: String },

    /// A unit id is not timestamp-prefixed.
    #[error(
        "invalid migration unit id '{unit_id}': expected a timestamp prefix such as \
         20240101120000_name"
    )]
    InvalidUnitId { unit_id: String },

    /// Reading or writing the changelog collection failed.
    #[error("changelog error: {0}")]
    Changelog(#[from] StoreError),
}

impl MigrationError {
    /// Id of the unit the error is attributed to, if any.
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            MigrationError::UnitExecution { unit_id, .. }
            | MigrationError::GuardRejected { unit_id, .. }
            | MigrationError::NotReversible { unit_id, .. }
            | MigrationError::UnknownUnit { unit_id }
            | MigrationError::DuplicateUnit { unit_id }
            | MigrationError::InvalidUnitId { unit_id } => Some(unit_id),
            _ => None,
        }
    }
}

/// Failure raised from inside a unit's forward/backward procedure.
#[derive(Debug, Error)]
pub enum UnitError {
    /// Underlying store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A document did not have the shape the unit expected.
    #[error("malformed document '{id}' in '{collection}': {message}")]
    MalformedDocument {
        collection: String,
        id: String,
        message: String,
    },

    /// A whole-collection load was attempted on a collection above its declared bound.
    #[error(
        "collection '{collection}' holds {count} document(s), above the in-memory limit of {limit}"
    )]
    CollectionTooLarge {
        collection: String,
        count: u64,
        limit: u64,
    },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl UnitError {
    pub fn other(message: impl Into<Cow<'static, str>>) -> Self {
        UnitError::Other { message: message.into() }
    }

    pub fn malformed(
        collection: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        UnitError::MalformedDocument {
            collection: collection.into(),
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by document store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An update expression could not be applied to a document.
    #[error("update of '{id}' in '{collection}' failed: {source}")]
    Update {
        collection: String,
        id: String,
        #[source]
        source: UpdateError,
    },

    /// Insert collided with an existing document id.
    #[error("document '{id}' already exists in '{collection}'")]
    DuplicateId { collection: String, id: String },

    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("index '{index}' already exists on '{collection}'")]
    IndexExists { collection: String, index: String },

    #[error("index '{index}' does not exist on '{collection}'")]
    IndexNotFound { collection: String, index: String },

    #[error("unsupported store url '{0}'")]
    UnsupportedUrl(String),

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

/// Errors raised while evaluating an update expression against one document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateError {
    #[error("cannot convert {found} value at '{path}' to {target}")]
    Conversion {
        path: String,
        found: ValueType,
        target: ValueType,
    },

    #[error("'{path}' holds a {found} where {expected} was expected")]
    TypeMismatch {
        path: String,
        found: ValueType,
        expected: ValueType,
    },

    #[error("'{path}' traverses a non-object value")]
    NotTraversable { path: String },

    #[error("'{0}' is not a valid field path")]
    InvalidPath(String),
}
