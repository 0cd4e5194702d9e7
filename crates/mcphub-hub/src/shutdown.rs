//! Client accounting and auto-shutdown
//!
//! Tracks active subscriber ids. When the set empties and auto-shutdown
//! is enabled, a grace timer is armed; a new subscriber cancels it. On
//! expiry a shutdown request is signalled on a watch channel the
//! embedding process observes (exit code handling is its concern).

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use mcphub_core::SubscriberId;

/// Why the hub asked to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No clients for the whole grace period.
    Idle,
    /// Explicit request (signal, API).
    Requested,
}

struct Accounting {
    active: HashSet<SubscriberId>,
    timer: Option<JoinHandle<()>>,
}

/// Subscriber accounting with an idle grace timer.
pub struct ClientRegistry {
    enabled: bool,
    delay: Duration,
    accounting: Mutex<Accounting>,
    shutdown_tx: watch::Sender<Option<ShutdownReason>>,
}

impl ClientRegistry {
    /// `delay = None` disables auto-shutdown entirely.
    pub fn new(delay: Option<Duration>) -> Self {
        let (shutdown_tx, _) = watch::channel(None);
        Self {
            enabled: delay.is_some(),
            delay: delay.unwrap_or_default(),
            accounting: Mutex::new(Accounting {
                active: HashSet::new(),
                timer: None,
            }),
            shutdown_tx,
        }
    }

    /// Observe shutdown requests; the value becomes `Some(reason)` once.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<Option<ShutdownReason>> {
        self.shutdown_tx.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.accounting.lock().active.len()
    }

    /// A new subscriber cancels any armed timer.
    pub fn register(&self, id: SubscriberId) {
        let mut accounting = self.accounting.lock();
        accounting.active.insert(id);
        if let Some(timer) = accounting.timer.take() {
            debug!("New subscriber, disarming auto-shutdown timer");
            timer.abort();
        }
        debug!(clients = accounting.active.len(), "Subscriber registered");
    }

    /// Removing the last subscriber arms the grace timer.
    pub fn unregister(&self, id: &SubscriberId) {
        let mut accounting = self.accounting.lock();
        accounting.active.remove(id);
        debug!(clients = accounting.active.len(), "Subscriber removed");

        if !accounting.active.is_empty() || !self.enabled {
            return;
        }
        if accounting.timer.is_some() {
            return;
        }

        let delay = self.delay;
        let shutdown_tx = self.shutdown_tx.clone();
        info!(delay_secs = delay.as_secs(), "No clients left, arming auto-shutdown timer");
        accounting.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("Auto-shutdown grace period expired");
            let _ = shutdown_tx.send(Some(ShutdownReason::Idle));
        }));
    }

    /// Explicit termination request (bypasses the timer).
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(Some(ShutdownReason::Requested));
    }
}

impl Drop for ClientRegistry {
    fn drop(&mut self) {
        if let Some(timer) = self.accounting.lock().timer.take() {
            timer.abort();
        }
    }
}
