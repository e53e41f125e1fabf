//! Migration units for the brandshop document store.
//!
//! Each file under `units/` registers one unit with `register_unit!`; the
//! `brandshop-migrate` binary collects them through [`unit_set`].

pub mod units;

use docshift::errors::MigrationError;
use docshift::unit::UnitSet;

/// Collections the units read and write.
pub mod collections {
    pub const ONBOARDING_QUESTIONS: &str = "onboardingQuestions";
    pub const BRANDS: &str = "brands";
    pub const DEALS: &str = "deals";
    pub const CODE_GROUPS: &str = "codeGroups";
    pub const USERS: &str = "users";
    pub const LOGIN_IMAGES: &str = "loginImages";
    pub const ANSWER_LOGS: &str = "answerLogs";
    pub const LEGACY_ANSWER_LOGS: &str = "legacyAnswerLogs";
    pub const ADVENT_CALENDAR: &str = "adventCalendar";
}

/// Every registered unit, ordered by id.
pub fn unit_set() -> Result<UnitSet, MigrationError> {
    UnitSet::from_inventory()
}
