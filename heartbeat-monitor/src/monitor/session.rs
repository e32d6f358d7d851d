//! Session lifetime and restart.
//!
//! A [`Session`] is one live pipeline (deduplicator, downtime detector,
//! recovery detector, state aggregator) bound to one [`Configuration`]. The
//! [`SessionController`] replaces it on every configuration change.
//!
//! All reactions run under the controller's mutex: external calls and
//! timer expiries each hold it for the whole reaction. Sessions are
//! numbered by a generation counter; every timer carries the generation of
//! the session that armed it.
//!
//! # Restart
//!
//! ```text
//!  configure(cfg) ──► validate ──► teardown old session (cancel timers)
//!                                        │
//!                                        ▼
//!                             generation += 1, clear log
//!                                        │
//!                     enabled? ──no──► log "Entering uptime state"
//!                        │
//!                       yes
//!                        ▼
//!              start Session(generation)
//! ```
//!
//! Teardown cancels each timer's token while holding the lock. An expiry
//! that was already waiting for the lock sees the cancelled token and does
//! nothing. A timer that reaches the controller with a live token but a
//! stale generation was never cancelled, which is a bug ([`LateTimerFired`]).

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::dedup::{Deduplicator, Pulse};
use super::downtime::DowntimeDetector;
use super::event_log::EventLog;
use super::recovery::RecoveryDetector;
use super::state::{self, LinkState, StateAggregator};
use crate::config::Configuration;
use crate::error::Result;
use crate::timer::Timer;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Active,
    Recovery,
}

/// Where detectors get their timers from.
pub(crate) trait ArmTimer {
    fn arm(&self, kind: TimerKind, after: Duration) -> Timer;
}

/// A timer outlived the session that armed it without being cancelled.
#[derive(Debug, Error)]
#[error("{kind:?} timer of session {fired} fired during session {current}")]
struct LateTimerFired {
    kind: TimerKind,
    fired: u64,
    current: u64,
}

/// Arms timers whose expiry is routed back into the controller.
#[derive(Debug)]
struct SessionTimers {
    runtime: Handle,
    generation: u64,
    controller: Weak<Mutex<SessionController>>,
}

impl ArmTimer for SessionTimers {
    fn arm(&self, kind: TimerKind, after: Duration) -> Timer {
        let controller = self.controller.clone();
        let generation = self.generation;

        Timer::arm(&self.runtime, after, move |token| {
            let Some(shared) = controller.upgrade() else {
                return;
            };
            let mut controller = shared.lock();
            if token.is_cancelled() {
                trace!(?kind, generation, "Timer cancelled while expiring");
                return;
            }
            controller.on_timer(generation, kind);
        })
    }
}

#[derive(Debug)]
struct Session {
    generation: u64,
    timers: SessionTimers,
    dedup: Deduplicator,
    downtime: DowntimeDetector,
    recovery: RecoveryDetector,
    aggregator: StateAggregator,
}

impl Session {
    fn start(config: &Configuration, timers: SessionTimers, log: &mut EventLog) -> Self {
        let mut session = Self {
            generation: timers.generation,
            timers,
            dedup: Deduplicator::default(),
            downtime: DowntimeDetector::new(config.active_window),
            recovery: RecoveryDetector::new(config.recovery_window),
            aggregator: StateAggregator::new(config.dim_level),
        };

        session.aggregator.push(LinkState::Uptime, log);
        session.downtime.start(&session.timers);
        session
    }

    fn state(&self) -> LinkState {
        self.aggregator.current().unwrap_or(LinkState::Uptime)
    }

    fn on_pulse(&mut self, pulse: Pulse) {
        if !self.dedup.admit(&pulse) {
            trace!(value = pulse.value, "Duplicate heartbeat suppressed");
            return;
        }
        debug!(value = pulse.value, "Heartbeat accepted");
        self.downtime.on_pulse(&self.timers);
    }

    /// Returns the new state if the expiry caused a transition.
    fn on_timer(&mut self, kind: TimerKind, log: &mut EventLog) -> Option<LinkState> {
        match kind {
            TimerKind::Active => {
                debug!(generation = self.generation, "Active window expired");
                let tick = self.downtime.on_expired(&self.timers, log);
                let transition = self.aggregator.push(tick.into(), log);
                self.recovery.on_downtime_tick(&self.timers);
                transition
            }
            TimerKind::Recovery => {
                debug!(generation = self.generation, "Recovery window expired");
                let tick = self.recovery.on_expired(log);
                self.aggregator.push(tick.into(), log)
            }
        }
    }

    fn teardown(&mut self) {
        self.downtime.cancel();
        self.recovery.cancel();
    }
}

/// Owns the running session, the event log and the published state.
#[derive(Debug)]
pub(crate) struct SessionController {
    runtime: Handle,
    this: Weak<Mutex<SessionController>>,
    config: Option<Configuration>,
    generation: u64,
    session: Option<Session>,
    log: EventLog,
    state_tx: watch::Sender<LinkState>,
}

impl SessionController {
    pub fn new_shared(runtime: Handle) -> Arc<Mutex<Self>> {
        let (state_tx, _) = watch::channel(LinkState::Uptime);
        Arc::new_cyclic(|this| {
            Mutex::new(Self {
                runtime,
                this: this.clone(),
                config: None,
                generation: 0,
                session: None,
                log: EventLog::default(),
                state_tx,
            })
        })
    }

    pub fn config(&self) -> Option<Configuration> {
        self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut EventLog {
        &mut self.log
    }

    pub fn state_rx(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Apply a new configuration.
    ///
    /// Returns `Ok(false)` when `config` equals the running one and nothing
    /// was restarted. An invalid configuration leaves everything as it was.
    pub fn on_config_change(&mut self, config: Configuration) -> Result<bool> {
        config.validate()?;

        if self.config == Some(config) {
            debug!("Configuration unchanged, keeping session");
            return Ok(false);
        }

        self.stop_session();
        self.generation += 1;
        self.config = Some(config);
        self.log.clear();

        if !config.enabled {
            self.log.push(state::entering(LinkState::Uptime));
            self.publish(LinkState::Uptime);
            info!(generation = self.generation, "Heartbeat monitoring disabled");
            return Ok(true);
        }

        let timers = SessionTimers {
            runtime: self.runtime.clone(),
            generation: self.generation,
            controller: self.this.clone(),
        };
        let session = Session::start(&config, timers, &mut self.log);
        self.publish(session.state());
        self.session = Some(session);

        info!(
            generation = self.generation,
            active_window = ?config.active_window,
            recovery_window = ?config.recovery_window,
            dim_level = config.dim_level,
            "Heartbeat monitoring started"
        );
        Ok(true)
    }

    pub fn on_pulse(&mut self, pulse: Pulse) {
        match self.session.as_mut() {
            Some(session) => session.on_pulse(pulse),
            None => trace!(value = pulse.value, "Heartbeat ignored, not watching"),
        }
    }

    /// Tear down the running session without starting another. The next
    /// `on_config_change` starts afresh even with the same configuration.
    pub fn shutdown(&mut self) {
        self.stop_session();
        self.generation += 1;
        self.config = None;
    }

    fn on_timer(&mut self, generation: u64, kind: TimerKind) {
        let current = self.generation;
        let Some(session) = self
            .session
            .as_mut()
            .filter(|session| session.generation == generation)
        else {
            let err = LateTimerFired {
                kind,
                fired: generation,
                current,
            };
            error!(%err, "Timer outlived its session");
            debug_assert!(false, "{err}");
            return;
        };

        if let Some(state) = session.on_timer(kind, &mut self.log) {
            self.publish(state);
        }
    }

    fn stop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
            info!(generation = session.generation, "Session stopped");
        }
    }

    // Watchers are only woken by actual changes.
    fn publish(&self, state: LinkState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!(from = %current, to = %state, "Link state changed");
            *current = state;
            true
        });
    }
}


#[cfg(test)]
mod tests {
    use tokio::time::{self, Instant};

    use super::*;
    use crate::error::Error;

    const ACTIVE: Duration = Duration::from_millis(100);
    const RECOVERY: Duration = Duration::from_millis(200);

    fn watching() -> Configuration {
        Configuration::default()
            .with_enabled(true)
            .with_active_window(ACTIVE)
            .with_recovery_window(RECOVERY)
            .with_dim_level(50)
    }

    fn messages(controller: &Arc<Mutex<SessionController>>) -> Vec<String> {
        controller
            .lock()
            .log()
            .entries()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_starts_a_session_in_uptime() {
        let controller = SessionController::new_shared(Handle::current());

        assert!(controller.lock().on_config_change(watching()).unwrap());

        let guard = controller.lock();
        let session = guard.session.as_ref().unwrap();
        assert_eq!(session.generation, 1);
        assert_eq!(session.state(), LinkState::Uptime);
        assert_eq!(session.downtime.deadline(), Some(Instant::now() + ACTIVE));
        assert_eq!(session.recovery.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_configuration_runs_no_session() {
        let controller = SessionController::new_shared(Handle::current());

        controller
            .lock()
            .on_config_change(Configuration::default())
            .unwrap();

        assert!(controller.lock().session.is_none());
        assert_eq!(messages(&controller), ["Entering uptime state"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_configuration_keeps_session() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();

        assert!(!controller.lock().on_config_change(watching()).unwrap());
        assert_eq!(controller.lock().generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_configuration_keeps_session() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();

        let result = controller
            .lock()
            .on_config_change(watching().with_active_window(Duration::ZERO));

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
        let guard = controller.lock();
        assert_eq!(guard.generation, 1);
        assert_eq!(guard.config, Some(watching()));
        assert!(guard.session.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_previous_timers() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*controller.lock().state_tx.borrow(), LinkState::Downtime);

        controller
            .lock()
            .on_config_change(watching().with_dim_level(10))
            .unwrap();

        // Would have been the old session's next active expiry and its
        // recovery expiry; neither may reach the new log.
        time::sleep(Duration::from_millis(90)).await;
        assert_eq!(messages(&controller), ["Entering uptime state"]);
        assert_eq!(controller.lock().generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pulses_without_session_are_ignored() {
        let controller = SessionController::new_shared(Handle::current());

        controller.lock().on_pulse(Pulse::now(1));

        assert!(controller.lock().log().entries().is_empty());
        assert!(controller.lock().session.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_timers_and_forgets_config() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();

        controller.lock().shutdown();
        time::sleep(Duration::from_millis(500)).await;

        assert_eq!(messages(&controller), ["Entering uptime state"]);
        assert_eq!(controller.lock().config(), None);
        assert!(controller.lock().on_config_change(watching()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn downtime_expiry_orders_log_entries() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();

        time::sleep(Duration::from_millis(150)).await;

        assert_eq!(
            messages(&controller),
            [
                "Entering uptime state",
                "Active window expired",
                "Entering downtime state",
                "Dimming all zones to 50",
            ]
        );
        let guard = controller.lock();
        let session = guard.session.as_ref().unwrap();
        assert_eq!(
            session.recovery.deadline(),
            Some(Instant::now() - Duration::from_millis(50) + RECOVERY)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_window_keeps_session() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();

        let result = controller
            .lock()
            .on_config_change(watching().with_active_window(Duration::MAX));

        assert!(matches!(
            result,
            Err(Error::InvalidConfiguration {
                field: "active_window",
                ..
            })
        ));
        assert_eq!(controller.lock().config(), Some(watching()));
        assert_eq!(controller.lock().generation, 1);

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*controller.lock().state_tx.borrow(), LinkState::Downtime);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn expiry_waiting_on_restart_is_dropped() {
        let controller = SessionController::new_shared(Handle::current());
        controller
            .lock()
            .on_config_change(watching().with_active_window(Duration::from_millis(10)))
            .unwrap();

        {
            let mut guard = controller.lock();
            // The active timer expires on a worker and blocks on the lock.
            std::thread::sleep(Duration::from_millis(100));
            guard
                .on_config_change(watching().with_enabled(false))
                .unwrap();
        }

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(messages(&controller), ["Entering uptime state"]);
        assert_eq!(*controller.lock().state_tx.borrow(), LinkState::Uptime);
    }

    #[cfg(debug_assertions)]
    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "Active timer of session 1 fired during session 2")]
    async fn live_timer_from_old_session_trips_assertion() {
        let controller = SessionController::new_shared(Handle::current());
        controller.lock().on_config_change(watching()).unwrap();
        controller
            .lock()
            .on_config_change(watching().with_dim_level(1))
            .unwrap();

        controller.lock().on_timer(1, TimerKind::Active);
    }
}
