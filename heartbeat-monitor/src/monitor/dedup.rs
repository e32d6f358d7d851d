use tokio::time::Instant;

/// One heartbeat as handed to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub value: i64,
    pub received_at: Instant,
}

impl Pulse {
    pub fn now(value: i64) -> Self {
        Self {
            value,
            received_at: Instant::now(),
        }
    }
}

/// Lets a pulse through only when its value differs from the last one let
/// through. The first pulse always passes.
#[derive(Debug, Default)]
pub(crate) struct Deduplicator {
    last: Option<i64>,
}

impl Deduplicator {
    pub fn admit(&mut self, pulse: &Pulse) -> bool {
        if self.last == Some(pulse.value) {
            return false;
        }
        self.last = Some(pulse.value);
        true
    }
}
