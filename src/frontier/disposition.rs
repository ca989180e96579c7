//! Atomic disposition bracketing
//!
//! Workers bracket the final, state-mutating stage of processing a URI with
//! `enter` and `leave`. A checkpoint closes the gate, which blocks new
//! brackets and waits for the open ones to drain.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    closed: bool,
    in_flight: HashSet<u32>,
}

/// Gate tracking which workers are inside a disposition bracket
#[derive(Debug, Default)]
pub struct DispositionGate {
    state: Mutex<GateState>,
    changed: Notify,
}

impl DispositionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a bracket for worker `serial`, waiting while the gate is closed
    pub async fn enter(&self, serial: u32) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if !state.closed {
                    state.in_flight.insert(serial);
                    return;
                }
            }

            notified.await;
        }
    }

    /// Closes the bracket for worker `serial`
    ///
    /// Returns false if the worker had no open bracket; calling this more
    /// than once is harmless.
    pub fn leave(&self, serial: u32) -> bool {
        let removed = {
            let mut state = self.lock();
            state.in_flight.remove(&serial)
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Closes the gate and waits until no bracket remains open
    pub async fn close(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                state.closed = true;
                if state.in_flight.is_empty() {
                    return;
                }
                tracing::debug!(
                    "Waiting for {} disposition(s) in progress",
                    state.in_flight.len()
                );
            }

            notified.await;
        }
    }

    /// Reopens the gate, releasing any worker waiting in `enter`
    pub fn open(&self) {
        self.lock().closed = false;
        self.changed.notify_waiters();
    }

    /// Number of workers currently inside a bracket
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
