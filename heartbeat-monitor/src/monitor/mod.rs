//! Heartbeat liveness monitoring.
//!
//! [`HeartbeatMonitor`] watches a stream of heartbeat pulses and derives
//! whether the link behind them is up or down:
//!
//! - No *distinct* pulse for a whole active window produces a downtime
//!   tick, repeated at the active-window cadence until a distinct pulse
//!   arrives. Consecutive pulses carrying the same value count once.
//! - Each downtime tick restarts the recovery window; when it runs out
//!   without another downtime tick the link is declared up again.
//! - Entering downtime dims all zones to the configured level.
//!
//! Every configuration change restarts monitoring from scratch: the old
//! session's timers are cancelled, the log is cleared and the state goes
//! back to uptime.
//!
//! ```text
//!            pulse ──► Deduplicator ──► DowntimeDetector ──► RecoveryDetector
//!                                             │                     │
//!                                       downtime tick           uptime tick
//!                                             ▼                     ▼
//!                        initial ──────► StateAggregator ◄──────────┘
//!                                             │
//!                                   EventLog + watch::<LinkState>
//! ```

mod dedup;
mod downtime;
mod event_log;
mod recovery;
mod session;
mod state;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

pub use dedup::Pulse;
pub use event_log::{LogEvent, LogUpdate};
pub use state::LinkState;

use crate::config::Configuration;
use crate::error::Result;
use session::SessionController;

/// Handle to a running monitor. Clones share the same monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    controller: Arc<Mutex<SessionController>>,
    state_rx: watch::Receiver<LinkState>,
}

impl HeartbeatMonitor {
    /// Create an idle monitor reporting uptime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime. Use
    /// [`with_runtime`](Self::with_runtime) from other threads.
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    /// Create an idle monitor whose timers run on `runtime`. The monitor
    /// itself can then be driven from any thread.
    pub fn with_runtime(runtime: Handle) -> Self {
        let controller = SessionController::new_shared(runtime);
        let state_rx = controller.lock().state_rx();
        Self {
            controller,
            state_rx,
        }
    }

    /// Replace the configuration, restarting monitoring unless `config`
    /// equals the current one.
    pub fn configure(&self, config: Configuration) -> Result<()> {
        self.controller.lock().on_config_change(config)?;
        Ok(())
    }

    /// Feed one heartbeat. Accepted silently while monitoring is disabled.
    pub fn pulse(&self, value: i64) {
        let pulse = Pulse::now(value);
        self.controller.lock().on_pulse(pulse);
    }

    pub fn current_state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Stream of state changes; the current value is readable immediately.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Receive every log update from now on, in emission order.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<LogUpdate> {
        self.controller.lock().log_mut().subscribe()
    }

    /// Snapshot of the current session's log.
    pub fn events(&self) -> Vec<LogEvent> {
        self.controller.lock().log().entries().to_vec()
    }

    pub fn config(&self) -> Option<Configuration> {
        self.controller.lock().config()
    }

    /// Stop monitoring and cancel all timers. A later
    /// [`configure`](Self::configure) starts again.
    pub fn shutdown(&self) {
        self.controller.lock().shutdown();
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}
