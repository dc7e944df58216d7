//! The playback session: one livestream being listened to, from start command
//! to teardown.
//!
//! A session owns four tasks: the connection watchdog (reconnects after we
//! lose the backend), the stream watchdog (waits out short broadcaster
//! dropouts), the player-state observer (projects player states into the play
//! state store) and the spot loop (interrupts the stream for queued
//! advertisements). All of them hang off one cancellation token, and every
//! way a session can die funnels into the same idempotent teardown.

mod spots;
mod watchdog;
#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use log::{info, warn};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::notify::{NotificationKind, Notifier};
use crate::play_state::PlayStateStore;
use crate::sdk::{
    BroadcasterId, Connection, LivestreamContainer, LivestreamLoader, LivestreamPlayer,
    PlayerState, SpotAudio, StreamToken,
};
use crate::spot_play::SpotPlayStore;

/// Tunables for one session. The reconnect policy is deliberately
/// configurable; the defaults match the upstream service's behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sleep between failed reconnect attempts.
    pub reconnect_interval: Duration,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// How long to wait for a broadcaster to come back before giving up.
    pub broadcaster_grace: Duration,
    /// Spot playback progress reporting interval.
    pub spot_progress_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(2000),
            max_reconnect_attempts: None,
            broadcaster_grace: Duration::from_secs(10),
            spot_progress_interval: Duration::from_millis(100),
        }
    }
}

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct SessionHandles {
    pub connection: Arc<dyn Connection>,
    pub loader: Arc<dyn LivestreamLoader>,
    pub container: Arc<dyn LivestreamContainer>,
    pub player: Arc<dyn LivestreamPlayer>,
    pub spot_audio: Arc<dyn SpotAudio>,
    pub notifier: Arc<dyn Notifier>,
    pub play_state: PlayStateStore,
    pub spot_play: SpotPlayStore,
}

/// Command to start playing one livestream. Token and broadcaster id are
/// required; the title and language are only used for display.
#[derive(Debug, Clone)]
pub struct StartPlayback {
    pub token: Option<StreamToken>,
    pub broadcaster_id: Option<BroadcasterId>,
    pub title: String,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    ExplicitStop,
    StartupFailure,
    PlayerFailed,
    RefreshFailed,
    RetriesExhausted,
    BroadcasterTimeout,
}

#[derive(Default)]
pub(crate) struct LossFlags {
    pub(crate) client_lost: bool,
    pub(crate) streamer_lost: bool,
}

pub(crate) struct SessionShared {
    pub(crate) config: SessionConfig,
    /// Token the session was started with. `Closed` handling maps to this
    /// token, not whatever the player switched to later.
    pub(crate) token: StreamToken,
    pub(crate) broadcaster_id: BroadcasterId,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) loader: Arc<dyn LivestreamLoader>,
    pub(crate) container: Arc<dyn LivestreamContainer>,
    pub(crate) player: Arc<dyn LivestreamPlayer>,
    pub(crate) spot_audio: Arc<dyn SpotAudio>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) play_state: PlayStateStore,
    pub(crate) spot_play: SpotPlayStore,
    pub(crate) flags: Mutex<LossFlags>,
    /// Cancels the pending broadcaster grace timer, if one is armed.
    pub(crate) grace_cancel: Mutex<Option<CancellationToken>>,
    pub(crate) cancel: CancellationToken,
    ended: AtomicBool,
    torn_down: watch::Sender<bool>,
}

impl SessionShared {
    /// End the session. Every exit path lands here; the teardown body runs
    /// exactly once, and later callers wait until it has finished.
    pub(crate) async fn end(&self, reason: EndReason) {
        if self.ended.swap(true, Ordering::SeqCst) {
            let mut done = self.torn_down.subscribe();
            let _ = done.wait_for(|torn_down| *torn_down).await;
            return;
        }

        match reason {
            EndReason::ExplicitStop => info!("playback session stopped"),
            other => warn!("playback session ending: {:?}", other),
        }

        // Stop the tasks first so nothing re-notifies or restarts playback
        // while we clean up behind it.
        self.cancel.cancel();

        self.spot_audio.stop();
        self.spot_play.reset();
        self.player.stop().await;
        self.play_state.clear();
        for kind in [
            NotificationKind::Livestream,
            NotificationKind::ClientConnectionLost,
            NotificationKind::StreamerConnectionLost,
            NotificationKind::Spot,
        ] {
            self.notifier.dismiss(kind);
        }

        let _ = self.torn_down.send(true);
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

/// A running playback session. Dropping the handle does not stop playback;
/// call [`PlaybackSession::end`].
pub struct PlaybackSession {
    shared: Arc<SessionShared>,
    _tasks: Vec<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Validate the start command, bring up the session tasks and issue the
    /// initial play request. A rejected play request or missing identifiers
    /// end the session before this returns.
    pub async fn start(
        handles: SessionHandles,
        config: SessionConfig,
        request: StartPlayback,
    ) -> Result<PlaybackSession> {
        let (token, broadcaster_id) = match (request.token, request.broadcaster_id) {
            (Some(token), Some(id)) if !token.is_empty() => (token, id),
            _ => {
                // Same guarantees as a full teardown, even though nothing ran.
                handles.spot_audio.stop();
                handles.spot_play.reset();
                handles.play_state.clear();
                for kind in [
                    NotificationKind::Livestream,
                    NotificationKind::ClientConnectionLost,
                    NotificationKind::StreamerConnectionLost,
                    NotificationKind::Spot,
                ] {
                    handles.notifier.dismiss(kind);
                }
                bail!("playback start rejected: stream token and broadcaster id are required");
            }
        };

        let (torn_down, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            config,
            token,
            broadcaster_id,
            connection: handles.connection,
            loader: handles.loader,
            container: handles.container,
            player: handles.player,
            spot_audio: handles.spot_audio,
            notifier: handles.notifier,
            play_state: handles.play_state,
            spot_play: handles.spot_play,
            flags: Mutex::new(LossFlags::default()),
            grace_cancel: Mutex::new(None),
            cancel: CancellationToken::new(),
            ended: AtomicBool::new(false),
            torn_down,
        });

        info!(
            "starting playback session for stream {} of broadcaster {}",
            shared.token, shared.broadcaster_id
        );
        shared.notifier.notify(
            NotificationKind::Livestream,
            format!("{} ({})", request.title, request.language),
        );

        // Observers go up before the play request so no early player event
        // slips past them.
        let tasks = vec![
            tokio::spawn(watchdog::run_connection_watchdog(shared.clone())),
            tokio::spawn(watchdog::run_stream_watchdog(shared.clone())),
            tokio::spawn(observe_player(shared.clone())),
            tokio::spawn(spots::run_spot_loop(shared.clone())),
        ];

        if !shared.player.play(&shared.token).await {
            shared.end(EndReason::StartupFailure).await;
            bail!("player rejected stream {}", shared.token);
        }

        Ok(PlaybackSession {
            shared,
            _tasks: tasks,
        })
    }

    pub async fn end(&self) {
        self.shared.end(EndReason::ExplicitStop).await;
    }

    pub fn is_ended(&self) -> bool {
        self.shared.is_ended()
    }
}

/// Projects the player's state sequence into the play state store and turns
/// player failures into session ends.
async fn observe_player(shared: Arc<SessionShared>) {
    let mut current = shared.player.current();
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            changed = current.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let state = current.borrow_and_update().clone();
        match state {
            PlayerState::New => {}
            PlayerState::Connecting(token) => shared.play_state.set_connecting(token),
            PlayerState::Playing(token) => shared.play_state.set_playing(token),
            PlayerState::Disconnected(token) => shared.play_state.set_disconnected(token),
            PlayerState::Failed => {
                shared.end(EndReason::PlayerFailed).await;
                break;
            }
            PlayerState::Closed => {
                // Closed while a watchdog is mid-recovery means the player
                // will come back; anything else is a normal stop.
                let lost = {
                    let flags = shared.flags.lock().await;
                    flags.client_lost || flags.streamer_lost
                };
                if lost {
                    shared.play_state.set_disconnected(shared.token.clone());
                } else {
                    shared.play_state.clear();
                }
            }
        }
    }
}
