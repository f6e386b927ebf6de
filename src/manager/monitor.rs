//! Per-relay signal monitor
//!
//! One local task per relay drains the relay's signal stream and forwards each
//! signal, in arrival order, through the signal writer. The `RelayMonitor`
//! also owns the relay's automatic authentication attempt. Dropping it aborts
//! both tasks, so removing the entry from the manager's table releases
//! everything the relay had running.

use crate::relays::{Relay, RelaySignal};
use futures::channel::mpsc;
use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use std::rc::Rc;
use tokio::task::spawn_local;
use tracing::{debug, trace};

/// Receives (normalized url, signal)
pub(crate) type SignalWriter = Rc<dyn Fn(&str, RelaySignal)>;

pub(crate) struct RelayMonitor {
    relay: Rc<dyn Relay>,
    // Distinguishes this entry from earlier ones under the same URL
    generation: u64,
    feed: AbortHandle,
    attempt: Option<AbortHandle>,
}

impl RelayMonitor {
    /// Spawns the monitor task over `signals`. The caller handles the relay's
    /// values from before the subscription.
    pub(crate) fn spawn(
        url: String,
        relay: Rc<dyn Relay>,
        generation: u64,
        signals: mpsc::UnboundedReceiver<RelaySignal>,
        writer: SignalWriter,
    ) -> Self {
        let (feed, registration) = AbortHandle::new_pair();
        let task = Abortable::new(run(url.clone(), signals, writer), registration);

        spawn_local(async move {
            if task.await.is_err() {
                trace!(relay = %url, "Relay monitor aborted");
            }
        });

        Self {
            relay,
            generation,
            feed,
            attempt: None,
        }
    }

    pub(crate) fn relay(&self) -> Rc<dyn Relay> {
        self.relay.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn attempt_in_flight(&self) -> bool {
        self.attempt.is_some()
    }

    /// Takes ownership of the automatic attempt's abort handle.
    pub(crate) fn start_attempt(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.attempt.replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn finish_attempt(&mut self) {
        self.attempt = None;
    }
}

impl Drop for RelayMonitor {
    fn drop(&mut self) {
        self.feed.abort();
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
    }
}

async fn run(
    url: String,
    mut signals: mpsc::UnboundedReceiver<RelaySignal>,
    writer: SignalWriter,
) {
    while let Some(signal) = signals.next().await {
        trace!(relay = %url, ?signal, "Relay signal");
        writer(&url, signal);
    }

    debug!(relay = %url, "Relay signal stream closed, monitor stopped");
}
