use docshift::register_unit;
use docshift::unit::{MigrationUnit, Step, StepUnit};

use crate::collections::{ANSWER_LOGS, LEGACY_ANSWER_LOGS};

pub const ID: &str = "20230501090000_drop_legacy_answer_log_text";

// Answers are keyed by option id now; the free text copy and the pre-2023
// log collection are no longer read anywhere.
fn unit() -> Box<dyn MigrationUnit> {
    Box::new(
        StepUnit::new(
            ID,
            vec![
                Step::remove_field(ANSWER_LOGS, "text"),
                Step::drop_collection(LEGACY_ANSWER_LOGS),
            ],
        )
        .describe("drop answer log free text and the legacy log collection"),
    )
}

register_unit!(unit);
