use docshift::register_unit;
use docshift::unit::{MigrationUnit, SeedUnit};
use docshift::Document;

use crate::collections::LOGIN_IMAGES;

pub const ID: &str = "20230410100000_seed_login_images";

const IMAGES: &[(&str, &str)] = &[
    ("login_city", "login/city-night.jpg"),
    ("login_beach", "login/beach-morning.jpg"),
    ("login_market", "login/market-stall.jpg"),
];

fn unit() -> Box<dyn MigrationUnit> {
    let images = IMAGES
        .iter()
        .enumerate()
        .map(|(position, (id, key))| {
            Document::new(*id)
                .with("objectKey", *key)
                .with("position", position as u64)
                .with("active", true)
        })
        .collect();
    Box::new(SeedUnit::new(ID, LOGIN_IMAGES, images).describe("seed login screen images"))
}

register_unit!(unit);
