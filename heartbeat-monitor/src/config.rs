use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

pub const ENV_ENABLED: &str = "HEARTBEAT_ENABLED";
pub const ENV_ACTIVE_WINDOW_MS: &str = "HEARTBEAT_ACTIVE_WINDOW_MS";
pub const ENV_RECOVERY_WINDOW_MS: &str = "HEARTBEAT_RECOVERY_WINDOW_MS";
pub const ENV_DIM_LEVEL: &str = "HEARTBEAT_DIM_LEVEL";

/// Longest accepted window. Anything longer has no deadline the timer can
/// represent reliably.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// One complete snapshot of the monitor settings.
///
/// The monitor never sees partial updates: every change replaces the whole
/// snapshot and restarts the watching session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    /// Whether heartbeats are being watched at all. A disabled monitor
    /// reports uptime and runs no timers.
    pub enabled: bool,

    /// Time without a distinct heartbeat after which the link is declared
    /// down.
    pub active_window: Duration,

    /// Time without a further downtime tick after which the link is
    /// declared recovered.
    pub recovery_window: Duration,

    /// Payload of the dimming action taken on entering downtime. Carried
    /// through to the log, not interpreted.
    pub dim_level: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            enabled: false,
            active_window: Duration::from_millis(2500),
            recovery_window: Duration::from_millis(7500),
            dim_level: 100,
        }
    }
}

impl Configuration {
    /// Build a configuration from raw millisecond values, as entered in a
    /// form. Non-positive windows are rejected.
    pub fn from_millis(
        enabled: bool,
        active_window_ms: i64,
        recovery_window_ms: i64,
        dim_level: u32,
    ) -> Result<Self> {
        let config = Self {
            enabled,
            active_window: window_from_millis("active_window", active_window_ms)?,
            recovery_window: window_from_millis("recovery_window", recovery_window_ms)?,
            dim_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by any `HEARTBEAT_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(enabled) = parse_var::<bool>(ENV_ENABLED)? {
            config.enabled = enabled;
        }
        if let Some(ms) = parse_var::<i64>(ENV_ACTIVE_WINDOW_MS)? {
            config.active_window = window_from_millis("active_window", ms)?;
        }
        if let Some(ms) = parse_var::<i64>(ENV_RECOVERY_WINDOW_MS)? {
            config.recovery_window = window_from_millis("recovery_window", ms)?;
        }
        if let Some(level) = parse_var::<u32>(ENV_DIM_LEVEL)? {
            config.dim_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn with_active_window(self, active_window: Duration) -> Self {
        Self {
            active_window,
            ..self
        }
    }

    pub fn with_recovery_window(self, recovery_window: Duration) -> Self {
        Self {
            recovery_window,
            ..self
        }
    }

    pub fn with_dim_level(self, dim_level: u32) -> Self {
        Self { dim_level, ..self }
    }

    /// Both windows must be strictly positive and at most [`MAX_WINDOW`],
    /// whether or not the monitor is enabled.
    pub fn validate(&self) -> Result<()> {
        check_window("active_window", self.active_window)?;
        check_window("recovery_window", self.recovery_window)
    }
}

fn check_window(field: &'static str, window: Duration) -> Result<()> {
    if window.is_zero() {
        return Err(Error::invalid(field, "must be positive"));
    }
    if window > MAX_WINDOW {
        return Err(Error::invalid(
            field,
            format!("must be at most {MAX_WINDOW:?}, got {window:?}"),
        ));
    }
    Ok(())
}

/// Convert a raw millisecond value from a form or the environment into a
/// window, rejecting non-positive values.
pub fn window_from_millis(field: &'static str, ms: i64) -> Result<Duration> {
    match u64::try_from(ms) {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(Error::invalid(field, format!("must be positive, got {ms} ms"))),
    }
}

fn parse_var<T: FromStr>(var: &'static str) -> Result<Option<T>> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Environment { var, value }),
        Err(_) => Ok(None),
    }
}
