//! Process-facing playback control: at most one playback session exists at a
//! time, started and stopped through this service.

use anyhow::Result;
use log::debug;
use tokio::sync::Mutex;

use crate::session::{PlaybackSession, SessionConfig, SessionHandles, StartPlayback};

pub struct PlayService {
    handles: SessionHandles,
    config: SessionConfig,
    active: Mutex<Option<PlaybackSession>>,
}

impl PlayService {
    pub fn new(handles: SessionHandles, config: SessionConfig) -> Self {
        Self {
            handles,
            config,
            active: Mutex::new(None),
        }
    }

    /// Start playing a livestream. Any running session is stopped first;
    /// switching streams never leaves two sessions alive.
    pub async fn start(&self, request: StartPlayback) -> Result<()> {
        self.stop().await;

        debug!("play service starting session: {:?}", request);
        let session =
            PlaybackSession::start(self.handles.clone(), self.config.clone(), request).await?;
        *self.active.lock().await = Some(session);
        Ok(())
    }

    /// Stop the running session, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let previous = self.active.lock().await.take();
        if let Some(session) = previous {
            session.end().await;
        }
    }

    /// Whether a session is running and has not ended itself.
    pub async fn is_active(&self) -> bool {
        matches!(&*self.active.lock().await, Some(session) if !session.is_ended())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testutil::{settle, Harness, PlayerCall};

    #[tokio::test(start_paused = true)]
    async fn starting_replaces_the_running_session() {
        let harness = Harness::new();
        let service = PlayService::new(harness.handles(), SessionConfig::default());

        service.start(harness.start_request()).await.unwrap();
        settle().await;
        assert!(service.is_active().await);

        let mut second = harness.start_request();
        second.token = Some("def".into());
        service.start(second).await.unwrap();
        settle().await;

        // the first session was torn down before the second played
        let calls = harness.player.calls();
        let stop_at = calls
            .iter()
            .position(|c| *c == PlayerCall::Stop)
            .expect("first session was stopped");
        let second_play_at = calls
            .iter()
            .position(|c| *c == PlayerCall::Play("def".into()))
            .expect("second session played");
        assert!(stop_at < second_play_at);
        assert!(service.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let harness = Harness::new();
        let service = PlayService::new(harness.handles(), SessionConfig::default());

        service.start(harness.start_request()).await.unwrap();
        settle().await;
        service.stop().await;
        service.stop().await;

        assert!(!service.is_active().await);
        assert_eq!(harness.play_state.current(), None);
        assert_eq!(harness.player.count(&PlayerCall::Stop), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_leaves_no_session_behind() {
        let harness = Harness::new();
        let service = PlayService::new(harness.handles(), SessionConfig::default());

        let mut request = harness.start_request();
        request.broadcaster_id = None;
        assert!(service.start(request).await.is_err());
        assert!(!service.is_active().await);
    }
}
