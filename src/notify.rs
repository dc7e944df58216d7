use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use tokio::sync::watch;

/// The notifications a playback session can own. At most one notification per
/// kind is visible at a time; re-notifying a kind replaces its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotificationKind {
    /// Persistent info about the livestream being played.
    Livestream,
    /// Our own connection to the backend is gone.
    ClientConnectionLost,
    /// The broadcaster's stream is gone, waiting for them to come back.
    StreamerConnectionLost,
    /// A spot is currently playing.
    Spot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
}

/// Where session notifications go. Implementations must keep `notify` and
/// `dismiss` safe to call from concurrent tasks; each call acquires whatever
/// internal lock it needs only for the duration of the call.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, text: String);
    fn dismiss(&self, kind: NotificationKind);
}

/// Notifier backed by a watch channel; the UI renders the active set in its
/// status area, and everything is mirrored to the log so headless runs see it.
pub struct StatusNotifier {
    active: Mutex<BTreeMap<NotificationKind, String>>,
    tx: Arc<watch::Sender<Vec<Notification>>>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            active: Mutex::new(BTreeMap::new()),
            tx: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.tx.subscribe()
    }

    fn publish(&self, active: &BTreeMap<NotificationKind, String>) {
        let snapshot = active
            .iter()
            .map(|(kind, text)| Notification {
                kind: *kind,
                text: text.clone(),
            })
            .collect();
        let _ = self.tx.send_replace(snapshot);
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for StatusNotifier {
    fn notify(&self, kind: NotificationKind, text: String) {
        info!("notification {:?}: {}", kind, text);
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(kind, text);
        self.publish(&active);
    }

    fn dismiss(&self, kind: NotificationKind) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.remove(&kind).is_some() {
            info!("notification {:?} dismissed", kind);
            self.publish(&active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_replaces_per_kind() {
        let notifier = StatusNotifier::new();
        let rx = notifier.subscribe();

        notifier.notify(NotificationKind::Livestream, "Derby (de)".into());
        notifier.notify(NotificationKind::Livestream, "Derby, 2nd half (de)".into());

        let active = rx.borrow().clone();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "Derby, 2nd half (de)");
    }

    #[test]
    fn dismiss_removes_only_its_kind() {
        let notifier = StatusNotifier::new();
        notifier.notify(NotificationKind::Livestream, "stream".into());
        notifier.notify(NotificationKind::ClientConnectionLost, "offline".into());

        notifier.dismiss(NotificationKind::ClientConnectionLost);

        let active = notifier.subscribe().borrow().clone();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, NotificationKind::Livestream);
    }

    #[test]
    fn dismissing_absent_kind_is_a_no_op() {
        let notifier = StatusNotifier::new();
        let mut rx = notifier.subscribe();
        rx.borrow_and_update();

        notifier.dismiss(NotificationKind::Spot);
        assert!(!rx.has_changed().unwrap());
    }
}
