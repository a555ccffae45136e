/*!
 * Timeout manager: the single cancellable deadline timer of a machine.
 *
 * Arming starts a countdown bound to the state just entered; expiry runs a
 * caller-supplied future that submits the timeout trigger back to the
 * engine. Every armed countdown carries an epoch. The engine checks the
 * epoch inside its critical section before honoring an expiry, so a timer
 * that raced past `disarm` while queued can never act across a state
 * boundary.
 */
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::debug;

use modeflow_core::types::StateId;

/// The single cancellable deadline timer of a machine instance
#[derive(Debug, Default)]
pub struct TimeoutManager {
    armed: Option<ArmedTimeout>,
    epoch: u64,
}

#[derive(Debug)]
struct ArmedTimeout {
    state: StateId,
    epoch: u64,
    handle: JoinHandle<()>,
}

impl TimeoutManager {
    /// Create a manager with nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a countdown for the state just entered
    ///
    /// Any previously armed countdown is disarmed first; at most one is
    /// active at a time. `fire` receives the epoch of the new countdown and
    /// returns the future to run on expiry.
    pub fn arm<F>(&mut self, state: StateId, deadline: Duration, fire: F)
    where
        F: FnOnce(u64) -> BoxFuture<'static, ()>,
    {
        self.disarm();
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let expiry = fire(epoch);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            expiry.await;
        });
        debug!(state = %state, ?deadline, epoch, "Armed state timeout");
        self.armed = Some(ArmedTimeout {
            state,
            epoch,
            handle,
        });
    }

    /// Cancel the armed countdown, if any
    ///
    /// Idempotent: disarming when nothing is armed, or after the timer
    /// already fired, has no effect.
    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.handle.abort();
            debug!(state = %armed.state, epoch = armed.epoch, "Disarmed state timeout");
        }
    }

    /// Whether an expiry with the given epoch is still the armed one
    pub fn is_current(&self, epoch: u64) -> bool {
        self.armed.as_ref().map_or(false, |a| a.epoch == epoch)
    }

    /// The state guarded by the armed countdown, if any
    pub fn guarded_state(&self) -> Option<&StateId> {
        self.armed.as_ref().map(|a| &a.state)
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        self.disarm();
    }
}
