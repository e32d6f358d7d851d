pub mod config;
pub mod error;
pub mod monitor;
pub mod timer;
pub mod tracing;

pub use config::Configuration;
pub use error::{Error, Result};
pub use monitor::{HeartbeatMonitor, LinkState, LogEvent, LogUpdate};
