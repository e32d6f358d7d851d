use serde::Serialize;
use strum::Display;

use super::event_log::{EventLog, LogEvent};

/// Availability of the watched link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Uptime,
    Downtime,
}

/// The log entry announcing that `state` is now current.
pub(crate) fn entering(state: LinkState) -> LogEvent {
    LogEvent::important(format!("Entering {state} state"))
}

/// Folds downtime and uptime ticks into a state sequence without repeats.
///
/// Every value that passes (the initial one, then each actual transition)
/// is logged as `Entering {state} state`; entering downtime also logs the
/// dimming action.
#[derive(Debug)]
pub(crate) struct StateAggregator {
    current: Option<LinkState>,
    dim_level: u32,
}

impl StateAggregator {
    pub fn new(dim_level: u32) -> Self {
        Self {
            current: None,
            dim_level,
        }
    }

    pub fn current(&self) -> Option<LinkState> {
        self.current
    }

    /// Returns the new state if `state` was a transition.
    pub fn push(&mut self, state: LinkState, log: &mut EventLog) -> Option<LinkState> {
        if self.current == Some(state) {
            return None;
        }
        self.current = Some(state);

        log.push(entering(state));
        if state == LinkState::Downtime {
            log.push(LogEvent::info(format!(
                "Dimming all zones to {}",
                self.dim_level
            )));
        }
        Some(state)
    }
}
