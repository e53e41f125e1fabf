use async_trait::async_trait;
use docshift::errors::UnitError;
use docshift::register_unit;
use docshift::store::DocumentStore;
use docshift::unit::{MigrationUnit, Reversibility, Reverted, UnitReport};
use docshift::{Filter, Update, ValueType};
use log::info;
use serde_json::json;

use crate::collections::CODE_GROUPS;

pub const ID: &str = "20230320110000_classify_codes_state";

/// Groups picked for the one-off manual code audit.
pub const AUDIT_SAMPLE_SIZE: usize = 20;

const LOSS: &str = "state values written after this unit ran are removed too";

/// Tags every code group `available` or `exhausted`, then flags a random
/// sample of available groups for a manual audit.
#[derive(Debug, Clone)]
pub struct ClassifyCodesState {
    sample_size: usize,
}

impl Default for ClassifyCodesState {
    fn default() -> Self {
        Self {
            sample_size: AUDIT_SAMPLE_SIZE,
        }
    }
}

impl ClassifyCodesState {
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }
}

#[async_trait]
impl MigrationUnit for ClassifyCodesState {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "classify code groups and sample an audit set"
    }

    fn reversibility(&self) -> Reversibility {
        Reversibility::Lossy(LOSS.to_string())
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError> {
        // Empty groups first; the second filter then only sees non-empty ones
        let exhausted = Filter::and([Filter::missing("state"), Filter::eq("codes", json!([]))]);
        let mut report: UnitReport = store
            .update_many(
                CODE_GROUPS,
                &exhausted,
                &Update::new().set("state", "exhausted"),
            )
            .await?
            .into();

        let available =
            Filter::and([Filter::missing("state"), Filter::type_is("codes", ValueType::Array)]);
        report.merge(
            store
                .update_many(
                    CODE_GROUPS,
                    &available,
                    &Update::new().set("state", "available"),
                )
                .await?
                .into(),
        );

        // One audit set per store, even across re-runs
        if store.count(CODE_GROUPS, &Filter::exists("auditSample")).await? == 0 {
            let sample = store
                .sample(
                    CODE_GROUPS,
                    &Filter::eq("state", "available"),
                    self.sample_size,
                )
                .await?;
            let updates: Vec<(String, Update)> = sample
                .iter()
                .map(|group| (group.id().to_string(), Update::new().set("auditSample", true)))
                .collect();
            if !updates.is_empty() {
                report.merge(store.update_batch(CODE_GROUPS, &updates).await?.into());
                info!("{ID}: {} code group(s) flagged for audit", updates.len());
            }
        }

        Ok(report)
    }

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError> {
        let touched = Filter::or([Filter::exists("state"), Filter::exists("auditSample")]);
        let result = store
            .update_many(
                CODE_GROUPS,
                &touched,
                &Update::new().unset("state").unset("auditSample"),
            )
            .await?;
        Ok(Reverted::Lossy {
            report: result.into(),
            warning: LOSS.to_string(),
        })
    }
}

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(ClassifyCodesState::default())
}

register_unit!(unit);
