//! Error types for the heartbeat monitor.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A configuration value was rejected before any session was started.
    /// The previously running session, if any, is left untouched.
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// An environment variable could not be parsed.
    #[error("environment variable {var}: cannot parse {value:?}")]
    Environment { var: &'static str, value: String },
}

impl Error {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}
