//! Declarative unit bodies whose backward procedure is derived from the forward one.

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{MigrationUnit, Reversibility, Reverted, UnitReport};
use crate::document::ValueType;
use crate::errors::UnitError;
use crate::filter::Filter;
use crate::store::{DocumentStore, IndexSpec};
use crate::two_phase::TwoPhase;
use crate::update::{Expr, Update};

/// Strings that convert to a number without losing information other than formatting.
static NUMERIC_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-?(\d+\.?\d*|\.\d+)([eE][-+]?\d+)?\s*$").expect("valid regex")
});

/// Direction of a scalar type conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    TextToNumber,
    NumberToText,
}

/// Backward half of a custom [`Step::UpdateMany`].
#[derive(Debug, Clone)]
pub struct Inverse {
    pub filter: Filter,
    pub update: Update,
    /// Set when the inverse cannot restore every value.
    pub loss: Option<String>,
}

impl Inverse {
    pub fn new(filter: Filter, update: Update) -> Self {
        Self {
            filter,
            update,
            loss: None,
        }
    }

    pub fn lossy(mut self, reason: impl Into<String>) -> Self {
        self.loss = Some(reason.into());
        self
    }
}

/// One schema transformation with a known inverse (or a documented lack of one).
#[derive(Debug, Clone)]
pub enum Step {
    /// Set `path` to `default` wherever it is missing.
    ///
    /// The inverse removes `path` from the documents that gained it.
    AddField {
        collection: String,
        path: String,
        default: Value,
    },
    RemoveField {
        collection: String,
        path: String,
    },
    RenameField {
        collection: String,
        from: String,
        to: String,
    },
    ConvertField {
        collection: String,
        path: String,
        conversion: Conversion,
    },
    /// Move a scalar into a one-element array; `from` and `to` may be the same path.
    WrapInArray {
        collection: String,
        from: String,
        to: String,
    },
    RenameCollection {
        from: String,
        to: String,
    },
    DropCollection {
        name: String,
    },
    CreateIndex {
        collection: String,
        index: IndexSpec,
    },
    DropIndex {
        collection: String,
        index: IndexSpec,
    },
    UpdateMany {
        collection: String,
        filter: Filter,
        update: Update,
        inverse: Option<Inverse>,
    },
}

impl Step {
    pub fn add_field(
        collection: impl Into<String>,
        path: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        Step::AddField {
            collection: collection.into(),
            path: path.into(),
            default: default.into(),
        }
    }

    pub fn remove_field(collection: impl Into<String>, path: impl Into<String>) -> Self {
        Step::RemoveField {
            collection: collection.into(),
            path: path.into(),
        }
    }

    pub fn rename_field(
        collection: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Step::RenameField {
            collection: collection.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn convert_field(
        collection: impl Into<String>,
        path: impl Into<String>,
        conversion: Conversion,
    ) -> Self {
        Step::ConvertField {
            collection: collection.into(),
            path: path.into(),
            conversion,
        }
    }

    pub fn wrap_in_array(
        collection: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Step::WrapInArray {
            collection: collection.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn rename_collection(from: impl Into<String>, to: impl Into<String>) -> Self {
        Step::RenameCollection {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn drop_collection(name: impl Into<String>) -> Self {
        Step::DropCollection { name: name.into() }
    }

    pub fn create_index(collection: impl Into<String>, index: IndexSpec) -> Self {
        Step::CreateIndex {
            collection: collection.into(),
            index,
        }
    }

    pub fn drop_index(collection: impl Into<String>, index: IndexSpec) -> Self {
        Step::DropIndex {
            collection: collection.into(),
            index,
        }
    }

    pub fn update_many(
        collection: impl Into<String>,
        filter: Filter,
        update: Update,
        inverse: Option<Inverse>,
    ) -> Self {
        Step::UpdateMany {
            collection: collection.into(),
            filter,
            update,
            inverse,
        }
    }

    pub fn reversibility(&self) -> Reversibility {
        match self {
            Step::RemoveField { path, .. } => {
                Reversibility::Irreversible(format!("removed field '{path}' is not retained"))
            }
            Step::DropCollection { name } => {
                Reversibility::Irreversible(format!("dropped collection '{name}' is not retained"))
            }
            Step::ConvertField { path, conversion, .. } => Reversibility::Lossy(match conversion {
                Conversion::TextToNumber => format!(
                    "converted text at '{path}' returns without padding or trailing zeros"
                ),
                Conversion::NumberToText => {
                    format!("converted whole-valued decimals at '{path}' return as integers")
                }
            }),
            Step::WrapInArray { to, .. } => Reversibility::Lossy(format!(
                "elements added to '{to}' after the first are dropped"
            )),
            Step::UpdateMany { inverse: None, .. } => {
                Reversibility::Irreversible("no inverse update".to_string())
            }
            Step::UpdateMany {
                inverse: Some(Inverse { loss: Some(reason), .. }),
                ..
            } => Reversibility::Lossy(reason.clone()),
            _ => Reversibility::Reversible,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Step::DropCollection { .. })
    }

    /// Run the step. Documents it rewrites carry `marker` until the step is reverted.
    pub async fn forward(
        &self,
        store: &dyn DocumentStore,
        marker: &TwoPhase,
    ) -> Result<UnitReport, UnitError> {
        match self {
            Step::AddField {
                collection,
                path,
                default,
            } => {
                let update = Update::new().set(path, default.clone()).then(marker.mark_done());
                Ok(store
                    .update_many(collection, &Filter::missing(path), &update)
                    .await?
                    .into())
            }
            Step::RemoveField { collection, path } => Ok(store
                .update_many(
                    collection,
                    &Filter::exists(path),
                    &Update::new().unset(path),
                )
                .await?
                .into()),
            Step::RenameField { collection, from, to } => {
                let filter = Filter::and([Filter::exists(from), Filter::missing(to)]);
                let update = Update::new().rename(from, to).then(marker.mark_done());
                Ok(store.update_many(collection, &filter, &update).await?.into())
            }
            Step::ConvertField {
                collection,
                path,
                conversion,
            } => {
                let filter = convertible(path, *conversion);
                let update = Update::new()
                    .set_expr(path, conversion.expr(path))
                    .then(marker.mark_done());
                Ok(store.update_many(collection, &filter, &update).await?.into())
            }
            Step::WrapInArray { collection, from, to } => {
                let filter = if from == to {
                    Filter::and([
                        Filter::exists(from),
                        Filter::not(Filter::type_is(from, ValueType::Array)),
                    ])
                } else {
                    Filter::and([Filter::exists(from), Filter::missing(to)])
                };
                let mut update = Update::new().set_expr(to, Expr::field(from).wrap_array());
                if from != to {
                    update = update.unset(from);
                }
                let update = update.then(marker.mark_done());
                Ok(store.update_many(collection, &filter, &update).await?.into())
            }
            Step::RenameCollection { from, to } => rename_collection(store, from, to).await,
            Step::DropCollection { name } => {
                let count = store.count(name, &Filter::All).await?;
                store.drop_collection(name).await?;
                Ok(UnitReport::deleted(count))
            }
            Step::CreateIndex { collection, index } => create_index(store, collection, index).await,
            Step::DropIndex { collection, index } => {
                store.drop_index(collection, &index.name).await?;
                Ok(UnitReport::default())
            }
            Step::UpdateMany {
                collection,
                filter,
                update,
                ..
            } => Ok(store.update_many(collection, filter, update).await?.into()),
        }
    }

    /// Run the derived inverse over the documents `forward` marked.
    ///
    /// Irreversible steps fail without touching the store.
    pub async fn backward(
        &self,
        store: &dyn DocumentStore,
        marker: &TwoPhase,
    ) -> Result<UnitReport, UnitError> {
        match self {
            Step::AddField { collection, path, .. } => {
                let update = Update::new().unset(path);
                revert_marked(store, collection, marker, Filter::All, update).await
            }
            Step::RenameField { collection, from, to } => {
                let filter = Filter::and([Filter::exists(to), Filter::missing(from)]);
                let update = Update::new().rename(to, from);
                revert_marked(store, collection, marker, filter, update).await
            }
            Step::ConvertField {
                collection,
                path,
                conversion,
            } => {
                let reverse = conversion.reverse();
                let update = Update::new().set_expr(path, reverse.expr(path));
                revert_marked(
                    store,
                    collection,
                    marker,
                    convertible(path, reverse),
                    update,
                )
                .await
            }
            Step::WrapInArray { collection, from, to } => {
                let filter = if from == to {
                    Filter::type_is(to, ValueType::Array)
                } else {
                    Filter::and([Filter::type_is(to, ValueType::Array), Filter::missing(from)])
                };
                let mut update = Update::new().set_expr(from, Expr::field(to).first());
                if from != to {
                    update = update.unset(to);
                }
                revert_marked(store, collection, marker, filter, update).await
            }
            Step::RenameCollection { from, to } => rename_collection(store, to, from).await,
            Step::CreateIndex { collection, index } => {
                store.drop_index(collection, &index.name).await?;
                Ok(UnitReport::default())
            }
            Step::DropIndex { collection, index } => create_index(store, collection, index).await,
            Step::UpdateMany {
                collection,
                inverse: Some(inverse),
                ..
            } => Ok(store
                .update_many(collection, &inverse.filter, &inverse.update)
                .await?
                .into()),
            Step::RemoveField { .. }
            | Step::DropCollection { .. }
            | Step::UpdateMany { inverse: None, .. } => match self.reversibility() {
                Reversibility::Irreversible(reason) => Err(UnitError::other(reason)),
                _ => Err(UnitError::other("step cannot be reverted")),
            },
        }
    }
}

impl Conversion {
    fn reverse(self) -> Conversion {
        match self {
            Conversion::TextToNumber => Conversion::NumberToText,
            Conversion::NumberToText => Conversion::TextToNumber,
        }
    }

    fn expr(self, path: &str) -> Expr {
        match self {
            Conversion::TextToNumber => Expr::field(path).numeric(),
            Conversion::NumberToText => Expr::field(path).text(),
        }
    }
}

/// Documents whose value at `path` the conversion can rewrite.
fn convertible(path: &str, conversion: Conversion) -> Filter {
    match conversion {
        Conversion::TextToNumber => Filter::and([
            Filter::type_is(path, ValueType::String),
            Filter::regex(path, NUMERIC_TEXT.clone()),
        ]),
        Conversion::NumberToText => Filter::type_is(path, ValueType::Number),
    }
}

/// Apply `update` to the marked documents still matching `filter`, then drop
/// the step's markers, including those on documents changed since `forward`.
async fn revert_marked(
    store: &dyn DocumentStore,
    collection: &str,
    marker: &TwoPhase,
    filter: Filter,
    update: Update,
) -> Result<UnitReport, UnitError> {
    let filter = Filter::and([marker.finished(), filter]);
    let report: UnitReport = store
        .update_many(collection, &filter, &update.then(marker.release()))
        .await?
        .into();
    marker.cleanup(store, collection).await?;
    Ok(report)
}

async fn rename_collection(
    store: &dyn DocumentStore,
    from: &str,
    to: &str,
) -> Result<UnitReport, UnitError> {
    let collections = store.list_collections().await?;
    if !collections.iter().any(|name| name == from) {
        debug!("collection '{from}' absent; rename to '{to}' already applied");
        return Ok(UnitReport::default());
    }
    let moved = store.count(from, &Filter::All).await?;
    store.rename_collection(from, to).await?;
    Ok(UnitReport {
        matched: moved,
        modified: moved,
        ..UnitReport::default()
    })
}

async fn create_index(
    store: &dyn DocumentStore,
    collection: &str,
    index: &IndexSpec,
) -> Result<UnitReport, UnitError> {
    let existing = store.list_indexes(collection).await?;
    if !existing.iter().any(|spec| spec.name == index.name) {
        store.create_index(collection, index).await?;
    }
    Ok(UnitReport::default())
}

/// A unit made of declarative steps.
///
/// Forward runs the steps in order; backward runs their inverses in reverse
/// order. The unit is as reversible as its least reversible step.
///
/// Each document step marks the documents it rewrites under
/// `_docshift.<id>_step<n>`, so its inverse leaves pre-existing data alone.
#[derive(Debug, Clone)]
pub struct StepUnit {
    id: String,
    description: String,
    steps: Vec<Step>,
}

impl StepUnit {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            steps,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[async_trait]
impl MigrationUnit for StepUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn reversibility(&self) -> Reversibility {
        self.steps
            .iter()
            .fold(Reversibility::Reversible, |acc, step| acc.weakest(step.reversibility()))
    }

    fn is_destructive(&self) -> bool {
        self.steps.iter().any(Step::is_destructive)
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError> {
        let mut report = UnitReport::default();
        for (index, step) in self.steps.iter().enumerate() {
            report.merge(step.forward(store, &TwoPhase::for_step(&self.id, index)).await?);
        }
        Ok(report)
    }

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError> {
        let reversibility = self.reversibility();
        if let Reversibility::Irreversible(reason) = reversibility {
            return Ok(Reverted::NotReversible { reason });
        }

        let mut report = UnitReport::default();
        for (index, step) in self.steps.iter().enumerate().rev() {
            report.merge(step.backward(store, &TwoPhase::for_step(&self.id, index)).await?);
        }

        Ok(match reversibility {
            Reversibility::Lossy(warning) => Reverted::Lossy { report, warning },
            _ => Reverted::Restored(report),
        })
    }
}
