//! Spot insertion: queued advertisements fully preempt the main stream's
//! audible output (mute, not pause) and play in strict arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use tokio::time::sleep;

use crate::notify::NotificationKind;
use crate::sdk::Spot;

use super::SessionShared;

/// Collects spot arrivals and sequences their playback. While a spot plays,
/// progress is sampled on a fixed interval and completion triggers the next
/// spot (or hands the audio back to the main stream).
pub(super) async fn run_spot_loop(shared: Arc<SessionShared>) {
    let Some(mut arrivals) = shared.player.take_spots() else {
        warn!("spot channel already taken, spots disabled for this session");
        return;
    };

    let mut queue: VecDeque<Spot> = VecDeque::new();
    let mut arrivals_open = true;

    loop {
        if shared.spot_play.current().is_some() {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                arrival = arrivals.recv(), if arrivals_open => {
                    match arrival {
                        Some(spot) => queue.push_back(spot),
                        None => arrivals_open = false,
                    }
                }
                _ = sleep(shared.config.spot_progress_interval) => {
                    if shared.spot_audio.is_finished() {
                        finish_current(&shared, &mut queue).await;
                    } else {
                        shared.spot_play.set_elapsed(shared.spot_audio.position_ms());
                    }
                }
            }
        } else if !queue.is_empty() {
            play_next(&shared, &mut queue).await;
        } else if !arrivals_open {
            // nothing playing, nothing queued, nothing more coming
            break;
        } else {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                arrival = arrivals.recv() => {
                    match arrival {
                        Some(spot) => {
                            queue.push_back(spot);
                            play_next(&shared, &mut queue).await;
                        }
                        None => arrivals_open = false,
                    }
                }
            }
        }
    }
}

/// The current spot finished playing: report it upstream, then move on.
async fn finish_current(shared: &Arc<SessionShared>, queue: &mut VecDeque<Spot>) {
    if let Some(spot) = shared.spot_play.current() {
        debug!("spot {} finished", spot.id);
        shared.player.track_spot_play_for(&spot);
    }
    play_next(shared, queue).await;
}

/// Start the next queued spot, or stop spot playback and un-mute the main
/// stream when the queue is empty.
async fn play_next(shared: &Arc<SessionShared>, queue: &mut VecDeque<Spot>) {
    if shared.cancel.is_cancelled() {
        return;
    }
    while let Some(spot) = queue.pop_front() {
        shared
            .notifier
            .notify(NotificationKind::Spot, spot_summary(&spot));
        shared.spot_play.set_spot(spot.clone());
        shared.player.mute();
        if shared.spot_audio.start(&spot).await {
            return;
        }
        warn!("failed to start audio of spot {}, skipping it", spot.id);
    }

    shared.notifier.dismiss(NotificationKind::Spot);
    shared.spot_play.reset();
    shared.player.unmute();
}

fn spot_summary(spot: &Spot) -> String {
    match &spot.banner {
        Some(banner) => banner.caption.clone(),
        None => "Advertisement".to_string(),
    }
}
