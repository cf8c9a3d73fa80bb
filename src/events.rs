//! Connectivity state and user-feedback callbacks.
//!
//! The host environment owns the engine and drives it through these explicit
//! surfaces instead of ambient global event listeners: it reports
//! connectivity transitions in, and receives user-facing feedback out through
//! the [`Notifier`] trait.

use tokio::sync::watch;

use crate::action::QueuedAction;
use crate::push::PushMessage;
use crate::replay::ReplayReport;

/// What woke the replay worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The host reported a transition from offline to online.
    ConnectivityRestored,
    /// An explicit sync request (the background-sync analog).
    Manual,
}

/// Trait for receiving engine events worth showing to the user.
///
/// All methods have default no-op implementations for convenience.
pub trait Notifier: Send + Sync {
    /// Called when the online/offline state changes.
    fn connectivity_changed(&self, _online: bool) {}

    /// Called when a submission was captured into the offline queue.
    fn action_deferred(&self, _action: &QueuedAction) {}

    /// Called when a queued action was replayed and confirmed by the server.
    fn action_replayed(&self, _action: &QueuedAction) {}

    /// Called when a replay attempt failed; the action stays queued.
    fn action_failed(&self, _action: &QueuedAction, _reason: &str) {}

    /// Called when a queued action outlived its configured age and was dropped.
    fn action_expired(&self, _action: &QueuedAction) {}

    /// Called at the end of a replay pass.
    fn sync_finished(&self, _report: &ReplayReport) {}

    /// Called when an incoming push payload was parsed.
    fn push_received(&self, _message: &PushMessage) {}
}

/// A null notifier that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNotifier;

impl Notifier for NoNotifier {}

/// Shared online/offline flag backed by a watch channel.
#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    /// Creates the flag with an initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Records the new state. Returns the previous one.
    pub fn set_online(&self, online: bool) -> bool {
        let mut previous = online;
        self.tx.send_modify(|state| {
            previous = *state;
            *state = online;
        });
        previous
    }

    /// Current state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver that observes state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
