use std::time::Duration;

use super::event_log::{EventLog, LogEvent};
use super::session::{ArmTimer, TimerKind};
use super::state::LinkState;
use crate::timer::Timer;

/// Emitted each time a full active window passes without a distinct pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DowntimeTick;

impl From<DowntimeTick> for LinkState {
    fn from(_: DowntimeTick) -> Self {
        LinkState::Downtime
    }
}

/// Keeps exactly one active-window timer armed while the session lives.
///
/// Expiry produces a [`DowntimeTick`] and immediately re-arms, so ticks
/// repeat at the active-window cadence for as long as pulses stay away. A
/// distinct pulse restarts the window from the moment it arrived.
#[derive(Debug)]
pub(crate) struct DowntimeDetector {
    window: Duration,
    pending: Option<Timer>,
}

impl DowntimeDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn start(&mut self, timers: &impl ArmTimer) {
        self.rearm(timers);
    }

    /// Only call with pulses that made it through deduplication.
    pub fn on_pulse(&mut self, timers: &impl ArmTimer) {
        self.rearm(timers);
    }

    pub fn on_expired(&mut self, timers: &impl ArmTimer, log: &mut EventLog) -> DowntimeTick {
        log.push(LogEvent::info("Active window expired"));
        self.rearm(timers);
        DowntimeTick
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

    fn rearm(&mut self, timers: &impl ArmTimer) {
        self.cancel();
        self.pending = Some(timers.arm(TimerKind::Active, self.window));
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{self, Instant};

    use super::super::session::testing::RecordingTimers;
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn start_arms_one_active_window() {
        let timers = RecordingTimers::new();
        let mut detector = DowntimeDetector::new(WINDOW);

        detector.start(&timers);

        assert_eq!(timers.armed(), [(TimerKind::Active, WINDOW)]);
        assert_eq!(detector.deadline(), Some(Instant::now() + WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_restarts_window_from_now() {
        let timers = RecordingTimers::new();
        let mut detector = DowntimeDetector::new(WINDOW);
        detector.start(&timers);

        time::advance(Duration::from_millis(60)).await;
        detector.on_pulse(&timers);

        assert_eq!(detector.deadline(), Some(Instant::now() + WINDOW));
        assert_eq!(timers.armed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_logs_and_rearms() {
        let timers = RecordingTimers::new();
        let mut log = EventLog::default();
        let mut detector = DowntimeDetector::new(WINDOW);
        detector.start(&timers);

        time::advance(WINDOW).await;
        let tick = detector.on_expired(&timers, &mut log);

        assert_eq!(LinkState::from(tick), LinkState::Downtime);
        assert_eq!(log.entries(), &[LogEvent::info("Active window expired")]);
        assert_eq!(detector.deadline(), Some(Instant::now() + WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms() {
        let timers = RecordingTimers::new();
        let mut detector = DowntimeDetector::new(WINDOW);
        detector.start(&timers);

        detector.cancel();

        assert_eq!(detector.deadline(), None);
    }
}
