pub mod cache;
pub mod config;
pub mod entry;
pub mod journaling;
pub mod search;
pub mod store;
pub mod sync;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
