use std::time::Duration;

use super::event_log::{EventLog, LogEvent};
use super::session::{ArmTimer, TimerKind};
use super::state::LinkState;
use crate::timer::Timer;

/// Emitted once a full recovery window passes without a downtime tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UptimeTick;

impl From<UptimeTick> for LinkState {
    fn from(_: UptimeTick) -> Self {
        LinkState::Uptime
    }
}

/// Restarts the recovery window on every downtime tick; the last tick wins.
#[derive(Debug)]
pub(crate) struct RecoveryDetector {
    window: Duration,
    pending: Option<Timer>,
}

impl RecoveryDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn on_downtime_tick(&mut self, timers: &impl ArmTimer) {
        self.cancel();
        self.pending = Some(timers.arm(TimerKind::Recovery, self.window));
    }

    pub fn on_expired(&mut self, log: &mut EventLog) -> UptimeTick {
        self.pending = None;
        log.push(LogEvent::info("Recovery window expired"));
        UptimeTick
    }

    #[cfg(test)]
    pub fn deadline(&self) -> Option<tokio::time::Instant> {
        self.pending.as_ref().map(Timer::deadline)
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.cancel();
        }
    }
}
