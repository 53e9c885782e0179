pub mod domain;
pub mod frameworks;
pub mod interface_adapters;
pub mod use_cases;

pub use frameworks::config::{ServerSettings, http_port};
pub use frameworks::server::{app, run, run_with_config};
