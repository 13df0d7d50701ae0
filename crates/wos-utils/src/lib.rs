
pub mod config;
pub mod logging;
pub mod telemetry;

pub use config::Settings;
pub use logging::WosLogger;
