//! Cancelable one-shot timers on the Tokio runtime.
//!
//! A [`Timer`] is a spawned task that sleeps until a deadline fixed at arm
//! time and then runs its callback once. Cancelling (or dropping the
//! handle) cancels the task's [`CancellationToken`] and aborts the task.
//!
//! Cancellation can lose a race with an expiry that has already started
//! running the callback. The callback therefore receives the token and must
//! check it again after taking whatever lock serializes it against the
//! canceller.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Timer {
    deadline: Instant,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Timer {
    /// Arm a timer that runs `on_fire` once `after` has elapsed from now.
    pub fn arm<F>(runtime: &Handle, after: Duration, on_fire: F) -> Self
    where
        F: FnOnce(&CancellationToken) + Send + 'static,
    {
        let deadline = Instant::now() + after;
        let token = CancellationToken::new();
        let task_token = token.clone();

        let task = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {}
                _ = time::sleep_until(deadline) => on_fire(&task_token),
            }
        });

        Self {
            deadline,
            token,
            task,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the timer. A callback already past its token check is not
    /// interrupted; one that has not started yet will never run.
    pub fn cancel(&self) {
        self.token.cancel();
        self.task.abort();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}
