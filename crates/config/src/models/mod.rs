pub mod app_config;
pub mod logging;
pub mod resilience;

pub use app_config::*;
pub use logging::*;
pub use resilience::*;
