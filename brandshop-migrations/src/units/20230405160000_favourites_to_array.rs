use docshift::register_unit;
use docshift::store::{IndexKind, IndexSpec};
use docshift::unit::{MigrationUnit, Step, StepUnit};

use crate::collections::USERS;

pub const ID: &str = "20230405160000_favourites_to_array";

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(
        StepUnit::new(
            ID,
            vec![
                Step::wrap_in_array(USERS, "favourite", "favourites"),
                Step::create_index(
                    USERS,
                    IndexSpec::new("users_favourites", "favourites", IndexKind::Tag),
                ),
            ],
        )
        .describe("users may favourite several brands"),
    )
}

register_unit!(unit);
