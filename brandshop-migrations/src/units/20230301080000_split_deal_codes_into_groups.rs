use async_trait::async_trait;
use docshift::batch::{BatchCursor, BulkWriter, DEFAULT_BATCH_SIZE};
use docshift::errors::UnitError;
use docshift::register_unit;
use docshift::store::DocumentStore;
use docshift::two_phase::TwoPhase;
use docshift::unit::{MigrationUnit, Reverted, UnitReport};
use docshift::{Document, Filter, Update, ValueType};
use log::debug;

use crate::collections::{CODE_GROUPS, DEALS};

pub const ID: &str = "20230301080000_split_deal_codes_into_groups";

pub fn group_id(deal_id: &str) -> String {
    format!("{deal_id}_codes")
}

/// Moves each deal's `codes` array into its own `codeGroups` document and
/// links it back through `codeGroupId`.
///
/// Two collections change per deal, so deals are marked pending first and
/// marked done in the same write that strips their codes. A crashed run picks
/// up the pending deals, reusing any group it already inserted.
#[derive(Debug, Clone)]
pub struct SplitDealCodes {
    batch_size: usize,
}

impl Default for SplitDealCodes {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SplitDealCodes {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Insert the groups for `deals` that do not exist yet.
    async fn insert_groups(
        &self,
        store: &dyn DocumentStore,
        deals: &[Document],
    ) -> Result<u64, UnitError> {
        let ids: Vec<String> = deals.iter().map(|deal| group_id(deal.id())).collect();
        let existing = store.find(CODE_GROUPS, &Filter::id_in(ids)).await?;

        let mut missing = Vec::new();
        for deal in deals {
            let id = group_id(deal.id());
            if existing.iter().any(|group| group.id() == id) {
                continue;
            }
            let codes = deal
                .get("codes")
                .cloned()
                .ok_or_else(|| {
                    UnitError::malformed(DEALS, deal.id(), "pending deal has no codes")
                })?;
            missing.push(Document::new(id).with("dealId", deal.id()).with("codes", codes));
        }

        if missing.is_empty() {
            return Ok(0);
        }
        Ok(store.insert_many(CODE_GROUPS, missing).await?)
    }
}

#[async_trait]
impl MigrationUnit for SplitDealCodes {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "split deal codes into codeGroups"
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError> {
        let phase = TwoPhase::new(ID);
        let to_mark = Filter::and([Filter::type_is("codes", ValueType::Array), phase.remaining()]);
        let marked = store.update_many(DEALS, &to_mark, &phase.mark_pending()).await?;
        debug!("{ID}: {} deal(s) marked pending", marked.modified);

        let mut report = UnitReport::default();
        let mut cursor =
            BatchCursor::new(store, DEALS, phase.in_flight()).with_batch_size(self.batch_size);
        let mut writer = BulkWriter::new(store, DEALS).with_batch_size(self.batch_size);

        while let Some(page) = cursor.next_batch().await? {
            report.inserted += self.insert_groups(store, &page).await?;
            for deal in &page {
                let link = Update::new()
                    .set("codeGroupId", group_id(deal.id()))
                    .unset("codes")
                    .then(phase.mark_done());
                writer.push(deal.id(), link).await?;
            }
        }
        report.merge(writer.finish().await?.into());

        phase.cleanup(store, DEALS).await?;
        Ok(report)
    }

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError> {
        let mut cursor = BatchCursor::new(store, CODE_GROUPS, Filter::exists("dealId"))
            .with_batch_size(self.batch_size);
        let mut writer = BulkWriter::new(store, DEALS).with_batch_size(self.batch_size);

        while let Some(page) = cursor.next_batch().await? {
            for group in page {
                let Some(deal_id) = group.get_str("dealId") else {
                    continue;
                };
                let codes = group.get("codes").cloned().unwrap_or_else(|| serde_json::json!([]));
                writer
                    .push(
                        deal_id,
                        Update::new().set("codes", codes).unset("codeGroupId"),
                    )
                    .await?;
            }
        }

        let mut report: UnitReport = writer.finish().await?.into();
        report.deleted = store.delete_many(CODE_GROUPS, &Filter::All).await?;
        store.drop_collection(CODE_GROUPS).await?;
        Ok(Reverted::Restored(report))
    }
}

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(SplitDealCodes::default())
}

register_unit!(unit);

#[cfg(test)]
mod tests {
    use super::*;
    use docshift::store::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new("brandshop_test").with_documents(
            DEALS,
            vec![
                Document::new("d1").with("title", "Ten off").with("codes", json!(["A1", "A2"])),
                Document::new("d2").with("title", "Free delivery").with("codes", json!([])),
                Document::new("d3").with("title", "No codes"),
            ],
        )
    }

    #[tokio::test]
    async fn splits_codes_and_clears_markers() {
        let store = store();
        let report = SplitDealCodes::default().forward(&store).await.unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.modified, 2);
        let d1 = store.get(DEALS, "d1").unwrap();
        assert_eq!(d1.get_str("codeGroupId"), Some("d1_codes"));
        assert!(d1.get("codes").is_none());
        assert!(d1.get("_docshift").is_none());
        assert_eq!(
            store.get(CODE_GROUPS, "d1_codes").unwrap().get("codes"),
            Some(&json!(["A1", "A2"]))
        );
        assert!(store.get(DEALS, "d3").unwrap().get("codeGroupId").is_none());
    }

    #[tokio::test]
    async fn resumes_after_a_crash_between_collections() {
        let store = store();
        let phase = TwoPhase::new(ID);
        // A previous run marked every deal and inserted d1's group, then died
        store
            .update_many(DEALS, &Filter::exists("codes"), &phase.mark_pending())
            .await
            .unwrap();
        store
            .insert_many(
                CODE_GROUPS,
                vec![
                    Document::new("d1_codes")
                        .with("dealId", "d1")
                        .with("codes", json!(["A1", "A2"])),
                ],
            )
            .await
            .unwrap();

        let report = SplitDealCodes::default().with_batch_size(1).forward(&store).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(store.snapshot(CODE_GROUPS).len(), 2);
        assert_eq!(
            store.get(DEALS, "d2").unwrap().get_str("codeGroupId"),
            Some("d2_codes")
        );
        assert!(store.get(DEALS, "d1").unwrap().get("_docshift").is_none());
    }

    #[tokio::test]
    async fn backward_restores_deals() {
        let store = store();
        let before = store.snapshot(DEALS);
        let unit = SplitDealCodes::default();

        unit.forward(&store).await.unwrap();
        let reverted = unit.backward(&store).await.unwrap();

        assert!(matches!(reverted, Reverted::Restored(report) if report.deleted == 2));
        assert_eq!(store.snapshot(DEALS), before);
        assert!(store.snapshot(CODE_GROUPS).is_empty());
    }
}
