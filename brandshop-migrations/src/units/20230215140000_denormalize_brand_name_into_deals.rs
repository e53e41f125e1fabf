use std::collections::HashMap;

use async_trait::async_trait;
use docshift::batch::{BatchCursor, BulkWriter, DEFAULT_BATCH_SIZE, load_small};
use docshift::errors::UnitError;
use docshift::register_unit;
use docshift::store::DocumentStore;
use docshift::two_phase::TwoPhase;
use docshift::unit::{MigrationUnit, Reverted, UnitReport};
use docshift::{Filter, Update};
use log::warn;

use crate::collections::{BRANDS, DEALS};

pub const ID: &str = "20230215140000_denormalize_brand_name_into_deals";

/// Brands are a curated list; anything past this is a data problem.
const MAX_BRANDS: u64 = 5_000;

/// Copies `brands.name` into every deal as `brandName` so deal lists render
/// without a lookup per row.
///
/// Some partner deals carry a hand-written `brandName` already. Deals this unit
/// fills in are marked, and only those lose the field on revert.
#[derive(Debug, Clone)]
pub struct DenormalizeBrandName {
    batch_size: usize,
}

impl Default for DenormalizeBrandName {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl DenormalizeBrandName {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[async_trait]
impl MigrationUnit for DenormalizeBrandName {
    fn id(&self) -> &str {
        ID
    }

    fn description(&self) -> &str {
        "copy brand names into deals"
    }

    async fn forward(&self, store: &dyn DocumentStore) -> Result<UnitReport, UnitError> {
        let brands = load_small(store, BRANDS, &Filter::exists("name"), MAX_BRANDS).await?;
        let names: HashMap<String, String> = brands
            .iter()
            .filter_map(|brand| {
                brand.get_str("name").map(|name| (brand.id().to_string(), name.to_string()))
            })
            .collect();

        let marker = TwoPhase::new(ID);
        let pending = Filter::and([Filter::exists("brandId"), Filter::missing("brandName")]);
        let mut cursor = BatchCursor::new(store, DEALS, pending).with_batch_size(self.batch_size);
        let mut writer = BulkWriter::new(store, DEALS).with_batch_size(self.batch_size);
        let mut orphans = 0u64;

        while let Some(page) = cursor.next_batch().await? {
            for deal in page {
                match deal.get_str("brandId").and_then(|brand_id| names.get(brand_id)) {
                    Some(name) => {
                        let update = Update::new()
                            .set("brandName", name.as_str())
                            .then(marker.mark_done());
                        writer.push(deal.id(), update).await?
                    }
                    None => orphans += 1,
                }
            }
        }

        if orphans > 0 {
            warn!("{ID}: {orphans} deal(s) reference a missing brand and were skipped");
        }
        Ok(writer.finish().await?.into())
    }

    async fn backward(&self, store: &dyn DocumentStore) -> Result<Reverted, UnitError> {
        let marker = TwoPhase::new(ID);
        let filled = Filter::and([marker.finished(), Filter::exists("brandName")]);
        let result = store
            .update_many(
                DEALS,
                &filled,
                &Update::new().unset("brandName").then(marker.release()),
            )
            .await?;
        marker.cleanup(store, DEALS).await?;
        Ok(Reverted::Restored(result.into()))
    }
}

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(DenormalizeBrandName::default())
}

register_unit!(unit);
