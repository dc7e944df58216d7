use std::sync::Arc;

use tokio::sync::watch;

use crate::sdk::Spot;

/// What the spot layer is doing right now: the spot being played (if any) and
/// how far into it playback is.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpotPlayState {
    pub current: Option<Spot>,
    pub elapsed_ms: u64,
}

/// Process-wide store for spot playback progress, written by the playback
/// session at 100ms granularity while a spot plays.
///
/// Invariant: `elapsed_ms` is 0 whenever `current` changes or becomes `None`.
#[derive(Clone)]
pub struct SpotPlayStore {
    tx: Arc<watch::Sender<SpotPlayState>>,
}

impl SpotPlayStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SpotPlayState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SpotPlayState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<Spot> {
        self.tx.borrow().current.clone()
    }

    /// Switch to a new spot; progress restarts at zero.
    pub fn set_spot(&self, spot: Spot) {
        self.tx.send_replace(SpotPlayState {
            current: Some(spot),
            elapsed_ms: 0,
        });
    }

    pub fn set_elapsed(&self, elapsed_ms: u64) {
        self.tx.send_if_modified(|state| {
            if state.current.is_none() || state.elapsed_ms == elapsed_ms {
                return false;
            }
            state.elapsed_ms = elapsed_ms;
            true
        });
    }

    /// No spot is playing, progress is zero.
    pub fn reset(&self) {
        self.tx.send_replace(SpotPlayState::default());
    }
}

impl Default for SpotPlayStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(id: &str) -> Spot {
        Spot {
            id: id.to_string(),
            audio_url: format!("http://ads.example/{id}.mp3"),
            duration_ms: 15_000,
            banner: None,
        }
    }

    #[test]
    fn elapsed_resets_when_spot_changes() {
        let store = SpotPlayStore::new();
        store.set_spot(spot("a"));
        store.set_elapsed(4200);
        assert_eq!(store.subscribe().borrow().elapsed_ms, 4200);

        store.set_spot(spot("b"));
        let state = store.subscribe().borrow().clone();
        assert_eq!(state.current.unwrap().id, "b");
        assert_eq!(state.elapsed_ms, 0);
    }

    #[test]
    fn elapsed_resets_on_reset() {
        let store = SpotPlayStore::new();
        store.set_spot(spot("a"));
        store.set_elapsed(900);
        store.reset();
        let state = store.subscribe().borrow().clone();
        assert_eq!(state.current, None);
        assert_eq!(state.elapsed_ms, 0);
    }

    #[test]
    fn elapsed_is_ignored_without_a_spot() {
        let store = SpotPlayStore::new();
        store.set_elapsed(500);
        assert_eq!(store.subscribe().borrow().elapsed_ms, 0);
    }
}
