use std::sync::Arc;

use log::debug;
use tokio::sync::watch;

use crate::sdk::StreamToken;

/// Playback status of the one livestream the application is listening to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayState {
    /// Connecting to the audio broadcast of the livestream.
    Connecting(StreamToken),
    /// The audio broadcast is playing.
    Playing(StreamToken),
}

impl PlayState {
    pub fn stream_token(&self) -> &StreamToken {
        match self {
            PlayState::Connecting(token) | PlayState::Playing(token) => token,
        }
    }
}

/// Process-wide store for the current play state. `None` while nothing is
/// connecting or playing.
///
/// Written only by the playback session; everything else subscribes. The store
/// does not check that a write's token matches the running session — it relies
/// on there being at most one active session, which `PlayService` guarantees
/// by replacing any running session on start.
#[derive(Clone)]
pub struct PlayStateStore {
    tx: Arc<watch::Sender<Option<PlayState>>>,
}

impl PlayStateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PlayState>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<PlayState> {
        self.tx.borrow().clone()
    }

    pub fn set_connecting(&self, token: StreamToken) {
        debug!("play state -> connecting ({})", token);
        self.tx.send_replace(Some(PlayState::Connecting(token)));
    }

    pub fn set_playing(&self, token: StreamToken) {
        debug!("play state -> playing ({})", token);
        self.tx.send_replace(Some(PlayState::Playing(token)));
    }

    /// A disconnected stream is presented as connecting again: the session
    /// either brings it back or tears everything down.
    pub fn set_disconnected(&self, token: StreamToken) {
        debug!("play state -> disconnected ({})", token);
        self.tx.send_replace(Some(PlayState::Connecting(token)));
    }

    pub fn clear(&self) {
        debug!("play state cleared");
        self.tx.send_replace(None);
    }
}

impl Default for PlayStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_are_observable_in_order() {
        let store = PlayStateStore::new();
        let mut rx = store.subscribe();
        assert_eq!(*rx.borrow_and_update(), None);

        store.set_connecting("abc".into());
        assert_eq!(
            *rx.borrow_and_update(),
            Some(PlayState::Connecting("abc".into()))
        );

        store.set_playing("abc".into());
        assert_eq!(
            *rx.borrow_and_update(),
            Some(PlayState::Playing("abc".into()))
        );

        store.clear();
        assert_eq!(*rx.borrow_and_update(), None);
    }

    #[test]
    fn disconnect_presents_as_connecting() {
        let store = PlayStateStore::new();
        store.set_playing("abc".into());
        store.set_disconnected("abc".into());
        assert_eq!(store.current(), Some(PlayState::Connecting("abc".into())));
    }

    #[test]
    fn clones_share_one_store() {
        let store = PlayStateStore::new();
        let other = store.clone();
        store.set_playing("abc".into());
        assert_eq!(other.current(), Some(PlayState::Playing("abc".into())));
    }
}
