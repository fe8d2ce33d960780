//! Cooperative stop signal for synchronization runs.
//!
//! A `StopSignal` is shared between the composition root, the scheduler and
//! the orchestrator. The orchestrator checks it between pages and before each
//! model; the scheduler additionally awaits it so a stop request interrupts
//! the idle wait between runs.

use crate::error::{Result, VaultError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
}

/// Shared, clonable stop flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    state: Arc<StopState>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Every clone observes it.
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request so the signal can gate a new run.
    pub fn clear(&self) {
        self.state.stopped.store(false, Ordering::SeqCst);
    }

    /// Return `VaultError::Stopped` if a stop was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            Err(VaultError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let mut notified = std::pin::pin!(self.state.notify.notified());
            // Register before checking the flag so a concurrent stop() is not missed.
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}
