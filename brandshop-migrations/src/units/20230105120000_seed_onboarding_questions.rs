use docshift::register_unit;
use docshift::unit::{MigrationUnit, SeedUnit};
use docshift::Document;
use serde_json::json;

use crate::collections::ONBOARDING_QUESTIONS;

pub const ID: &str = "20230105120000_seed_onboarding_questions";

fn questions() -> Vec<Document> {
    [
        (
            "style",
            "Which styles do you shop for?",
            json!(["Streetwear", "Classic", "Sporty", "Minimal"]),
        ),
        (
            "budget",
            "What do you usually spend on an outfit?",
            json!(["Under 50", "50-150", "150+"]),
        ),
        ("categories", "What are you looking for?", json!(["Clothing", "Shoes", "Beauty", "Home"])),
        ("frequency", "How often do you shop online?", json!(["Weekly", "Monthly", "Rarely"])),
    ]
    .into_iter()
    .enumerate()
    .map(|(position, (key, prompt, options))| {
        Document::new(format!("onboarding_{key}"))
            .with("key", key)
            .with("prompt", prompt)
            .with("options", options)
            .with("position", position as u64)
    })
    .collect()
}

fn unit() -> Box<dyn MigrationUnit> {
    Box::new(
        SeedUnit::new(ID, ONBOARDING_QUESTIONS, questions()).describe("seed onboarding questions"),
    )
}

register_unit!(unit);
