//! The two loss watchdogs: one for our own connection to the backend, one for
//! the broadcaster's side of the stream.

use std::sync::Arc;

use log::{debug, warn};
use tokio::time::sleep;

use crate::notify::NotificationKind;
use crate::sdk::{ConnectionState, Livestream};

use super::{EndReason, SessionShared};

/// Watches the backend connection. On loss: notify, stop playback, retry
/// reconnecting at a fixed interval. On recovery: refresh the listing and
/// resume if the broadcaster is still streaming.
pub(super) async fn run_connection_watchdog(shared: Arc<SessionShared>) {
    let mut state = shared.connection.state();
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current = *state.borrow_and_update();
        let keep_running = match current {
            ConnectionState::Disconnected => on_connection_lost(&shared).await,
            ConnectionState::Connected => on_connection_restored(&shared).await,
            _ => true,
        };
        if !keep_running {
            break;
        }
    }
}

/// Returns `false` once the session is over and the watchdog should exit.
async fn on_connection_lost(shared: &Arc<SessionShared>) -> bool {
    if shared.cancel.is_cancelled() {
        return false;
    }
    {
        let mut flags = shared.flags.lock().await;
        if flags.client_lost {
            // duplicate disconnect events are ignored
            return true;
        }
        flags.client_lost = true;
    }

    shared.notifier.notify(
        NotificationKind::ClientConnectionLost,
        "Connection lost, trying to reconnect".to_string(),
    );
    shared.player.stop().await;

    let mut attempts: u32 = 0;
    loop {
        if shared.cancel.is_cancelled() {
            return false;
        }
        if shared.connection.reconnect().await {
            // the Connected emission takes it from here
            return true;
        }

        attempts += 1;
        debug!("reconnect attempt {} failed", attempts);
        if let Some(max) = shared.config.max_reconnect_attempts {
            if attempts >= max {
                warn!("giving up after {} reconnect attempts", attempts);
                shared.end(EndReason::RetriesExhausted).await;
                return false;
            }
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => return false,
            _ = sleep(shared.config.reconnect_interval) => {}
        }
    }
}

async fn on_connection_restored(shared: &Arc<SessionShared>) -> bool {
    if shared.cancel.is_cancelled() {
        return false;
    }
    {
        let mut flags = shared.flags.lock().await;
        if !flags.client_lost {
            return true;
        }
        flags.client_lost = false;
    }

    shared.notifier.dismiss(NotificationKind::ClientConnectionLost);

    // While we were away the broadcaster may have restarted under a new token
    // or stopped entirely, so the listing has to be refreshed before playing.
    if !shared.loader.load().await {
        shared.end(EndReason::RefreshFailed).await;
        return false;
    }

    let lookup = shared.container.by_broadcaster(shared.broadcaster_id);
    let stream = lookup.borrow().clone();
    match stream {
        // Broadcaster gone; the stream watchdog decides whether to wait.
        None => {}
        Some(stream) => {
            if !shared.player.play(&stream.token).await {
                warn!("resume rejected for stream {}", stream.token);
            }
        }
    }
    true
}

/// Watches the broadcaster's stream presence. A dropout arms a one-shot grace
/// timer that ends the session unless the broadcaster comes back first.
pub(super) async fn run_stream_watchdog(shared: Arc<SessionShared>) {
    let mut lookup = shared.container.by_broadcaster(shared.broadcaster_id);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            changed = lookup.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current = lookup.borrow_and_update().clone();
        match current {
            None => on_streamer_lost(&shared).await,
            Some(stream) => on_streamer_update(&shared, stream).await,
        }
    }
}

async fn on_streamer_lost(shared: &Arc<SessionShared>) {
    if shared.cancel.is_cancelled() {
        return;
    }
    {
        let mut flags = shared.flags.lock().await;
        if flags.streamer_lost {
            return;
        }
        flags.streamer_lost = true;
    }

    shared.player.stop().await;
    shared.notifier.notify(
        NotificationKind::StreamerConnectionLost,
        "Broadcaster is offline, waiting for them to return".to_string(),
    );

    let grace = shared.cancel.child_token();
    {
        let mut slot = shared.grace_cancel.lock().await;
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        *slot = Some(grace.clone());
    }

    let timer_shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            _ = grace.cancelled() => {}
            _ = sleep(timer_shared.config.broadcaster_grace) => {
                timer_shared.end(EndReason::BroadcasterTimeout).await;
            }
        }
    });
}

async fn on_streamer_update(shared: &Arc<SessionShared>, stream: Livestream) {
    if shared.cancel.is_cancelled() {
        return;
    }
    let was_lost = {
        let mut flags = shared.flags.lock().await;
        std::mem::replace(&mut flags.streamer_lost, false)
    };

    if was_lost {
        if let Some(grace) = shared.grace_cancel.lock().await.take() {
            grace.cancel();
        }
        shared.notifier.dismiss(NotificationKind::StreamerConnectionLost);

        // the token may have changed if the broadcaster restarted
        if !shared.player.play(&stream.token).await {
            warn!("resume rejected for stream {}", stream.token);
        }
    }

    shared.notifier.notify(
        NotificationKind::Livestream,
        format!(
            "{} ({}), {} listeners",
            stream.title, stream.language, stream.listeners
        ),
    );
}
