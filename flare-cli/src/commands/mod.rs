//! CLI command implementations

mod config;
mod info;
mod list;
mod record;

pub use config::{config, ConfigArgs};
pub use info::info;
pub use list::{list, ListArgs};
pub use record::{record, RecordArgs};
