pub mod db;
pub mod migrations;
pub mod models;

pub use db::helpers::local_midnight;
pub use db::{metadata_keys, Database};
pub use models::{duration_from_secs, seconds_between, SessionRecord};
