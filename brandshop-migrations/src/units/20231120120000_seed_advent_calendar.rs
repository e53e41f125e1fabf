use docshift::register_unit;
use docshift::unit::{MigrationUnit, SeedUnit};
use docshift::Document;

use crate::collections::ADVENT_CALENDAR;

pub const ID: &str = "20231120120000_seed_advent_calendar";

const DOORS: u32 = 24;

fn doors() -> Vec<Document> {
    (1..=DOORS)
        .map(|day| {
            Document::new(format!("advent_2023_{day:02}"))
                .with("year", 2023)
                .with("day", day)
                .with("opensAt", format!("2023-12-{day:02}T00:00:00Z"))
                .with("dealId", serde_json::Value::Null)
        })
        .collect()
}

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(
        SeedUnit::new(ID, ADVENT_CALENDAR, doors()).describe("seed the 2023 advent calendar doors"),
    )
}

register_unit!(unit);
