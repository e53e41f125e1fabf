//! Migration units, registered at link time.

#[path = "20230105120000_seed_onboarding_questions.rs"]
mod _20230105120000_seed_onboarding_questions;
#[path = "20230112093000_rename_brand_logo_field.rs"]
mod _20230112093000_rename_brand_logo_field;
#[path = "20230201101500_deal_discount_to_number.rs"]
mod _20230201101500_deal_discount_to_number;
#[path = "20230215140000_denormalize_brand_name_into_deals.rs"]
mod _20230215140000_denormalize_brand_name_into_deals;
#[path = "20230301080000_split_deal_codes_into_groups.rs"]
mod _20230301080000_split_deal_codes_into_groups;
#[path = "20230320110000_classify_codes_state.rs"]
mod _20230320110000_classify_codes_state;
#[path = "20230405160000_favourites_to_array.rs"]
mod _20230405160000_favourites_to_array;
#[path = "20230410100000_seed_login_images.rs"]
mod _20230410100000_seed_login_images;
#[path = "20230501090000_drop_legacy_answer_log_text.rs"]
mod _20230501090000_drop_legacy_answer_log_text;
#[path = "20231120120000_seed_advent_calendar.rs"]
mod _20231120120000_seed_advent_calendar;

pub use self::_20230215140000_denormalize_brand_name_into_deals::DenormalizeBrandName;
pub use self::_20230301080000_split_deal_codes_into_groups::SplitDealCodes;
pub use self::_20230320110000_classify_codes_state::ClassifyCodesState;
