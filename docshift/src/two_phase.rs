//! Per-document progress markers for units that write to more than one collection.
//!
//! A unit that derives documents in one collection from documents in another
//! cannot select its remaining work by shape alone once the target exists. It
//! marks each source document `pending` before writing the derived data and
//! `done` after, so a crashed run resumes from the unfinished documents. A
//! final cleanup pass removes the markers.
//!
//! A unit whose inverse cannot tell its own writes apart from data that was
//! already there leaves its `done` markers in place after `forward`, and
//! `backward` reverts only the marked documents.

use serde_json::{Map, Value};

use crate::errors::StoreError;
use crate::filter::Filter;
use crate::store::{DocumentStore, WriteResult};
use crate::update::Update;

/// Reserved top-level field holding every unit's markers.
pub const MARKER_FIELD: &str = "_docshift";

const PENDING: &str = "pending";
const DONE: &str = "done";

/// Marker helper scoped to one unit id.
#[derive(Debug, Clone)]
pub struct TwoPhase {
    path: String,
}

impl TwoPhase {
    pub fn new(unit_id: &str) -> Self {
        Self {
            path: format!("{MARKER_FIELD}.{unit_id}"),
        }
    }

    /// Marker for one step of a multi-step unit.
    pub fn for_step(unit_id: &str, index: usize) -> Self {
        Self::new(&format!("{unit_id}_step{index}"))
    }

    /// Dotted path of this unit's marker.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Documents this unit has not finished; combine with the unit's own shape filter.
    pub fn remaining(&self) -> Filter {
        Filter::ne(&self.path, DONE)
    }

    pub fn finished(&self) -> Filter {
        Filter::eq(&self.path, DONE)
    }

    /// Documents a crashed run started but did not complete.
    pub fn in_flight(&self) -> Filter {
        Filter::eq(&self.path, PENDING)
    }

    pub fn mark_pending(&self) -> Update {
        Update::new().set(&self.path, PENDING)
    }

    pub fn mark_done(&self) -> Update {
        Update::new().set(&self.path, DONE)
    }

    /// Drop the marker as part of the write that reverts a document.
    pub fn release(&self) -> Update {
        Update::new().unset(&self.path)
    }

    /// Remove this unit's markers, and the marker field itself once empty.
    pub async fn cleanup(
        &self,
        store: &dyn DocumentStore,
        collection: &str,
    ) -> Result<WriteResult, StoreError> {
        let mut result = store
            .update_many(
                collection,
                &Filter::exists(&self.path),
                &Update::new().unset(&self.path),
            )
            .await?;
        let empty = Filter::eq(MARKER_FIELD, Value::Object(Map::new()));
        result.merge(
            store
                .update_many(collection, &empty, &Update::new().unset(MARKER_FIELD))
                .await?,
        );
        Ok(result)
    }
}
