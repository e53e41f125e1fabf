use docshift::register_unit;
use docshift::unit::{Conversion, MigrationUnit, Step, StepUnit};

use crate::collections::DEALS;

pub const ID: &str = "20230201101500_deal_discount_to_number";

// "15" and "12.50" become numbers; free text like "half price" is left alone
fn unit() -> Box<dyn MigrationUnit> {
    Box::new(
        StepUnit::new(
            ID,
            vec![Step::convert_field(DEALS, "discount", Conversion::TextToNumber)],
        )
        .describe("store deal discounts as numbers"),
    )
}

register_unit!(unit);
