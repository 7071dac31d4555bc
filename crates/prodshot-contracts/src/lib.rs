pub mod events;
pub mod models;
pub mod products;
pub mod prompts;
pub mod runs;

use chrono::{SecondsFormat, Utc};

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
