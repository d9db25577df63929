pub mod config;
pub mod monitor;

pub use config::{load_config, Config, Settings};
pub use monitor::Monitor;
