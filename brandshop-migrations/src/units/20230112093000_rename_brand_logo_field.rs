use docshift::register_unit;
use docshift::unit::{MigrationUnit, Step, StepUnit};

use crate::collections::BRANDS;

pub const ID: &str = "20230112093000_rename_brand_logo_field";

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(
        StepUnit::new(ID, vec![Step::rename_field(BRANDS, "logo", "logoUrl")])
            .describe("rename brands.logo to brands.logoUrl"),
    )
}

register_unit!(unit);
