//! Fake seam implementations used by the session and service tests. Each fake
//! records the calls it receives and lets the test script upstream behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::notify::{NotificationKind, Notifier};
use crate::play_state::PlayStateStore;
use crate::sdk::{
    BroadcasterId, Connection, ConnectionState, Livestream, LivestreamContainer,
    LivestreamLoader, LivestreamPlayer, PlayerState, Spot, SpotAudio, StreamToken,
};
use crate::spot_play::SpotPlayStore;

use super::{SessionHandles, StartPlayback};

pub(crate) fn livestream(token: &str, broadcaster: u64) -> Livestream {
    Livestream {
        token: token.into(),
        broadcaster_id: BroadcasterId(broadcaster),
        title: "Local derby".to_string(),
        language: "en".to_string(),
        listeners: 17,
    }
}

pub(crate) fn spot(id: &str) -> Spot {
    Spot {
        id: id.to_string(),
        audio_url: format!("http://ads.example/{id}.mp3"),
        duration_ms: 15_000,
        banner: None,
    }
}

/// Let every ready task on the current-thread test runtime run to its next
/// await point a few times, so channel sends propagate deterministically.
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub(crate) struct FakeConnection {
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) reconnect_results: Mutex<VecDeque<bool>>,
    pub(crate) reconnect_calls: AtomicU32,
}

impl FakeConnection {
    pub(crate) fn new() -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Arc::new(Self {
            state_tx,
            reconnect_results: Mutex::new(VecDeque::new()),
            reconnect_calls: AtomicU32::new(0),
        })
    }

    pub(crate) fn script_reconnects(&self, results: &[bool]) {
        self.reconnect_results
            .lock()
            .unwrap()
            .extend(results.iter().copied());
    }

    pub(crate) fn reconnects(&self) -> u32 {
        self.reconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn connect(&self) -> bool {
        true
    }

    async fn reconnect(&self) -> bool {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.reconnect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false)
    }
}

pub(crate) struct FakeLoader {
    pub(crate) result: AtomicBool,
    pub(crate) calls: AtomicU32,
}

impl FakeLoader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            result: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl LivestreamLoader for FakeLoader {
    async fn load(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeContainer {
    pub(crate) online_tx: watch::Sender<Vec<Livestream>>,
    pub(crate) lookup_tx: watch::Sender<Option<Livestream>>,
}

impl FakeContainer {
    pub(crate) fn new(initial: Option<Livestream>) -> Arc<Self> {
        let (online_tx, _) = watch::channel(initial.clone().into_iter().collect());
        let (lookup_tx, _) = watch::channel(initial);
        Arc::new(Self {
            online_tx,
            lookup_tx,
        })
    }
}

impl LivestreamContainer for FakeContainer {
    fn online(&self) -> watch::Receiver<Vec<Livestream>> {
        self.online_tx.subscribe()
    }

    fn by_broadcaster(&self, _id: BroadcasterId) -> watch::Receiver<Option<Livestream>> {
        self.lookup_tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlayerCall {
    Play(StreamToken),
    Stop,
    Mute,
    Unmute,
    TrackSpot(String),
}

pub(crate) struct FakePlayer {
    pub(crate) state_tx: watch::Sender<PlayerState>,
    pub(crate) calls: Mutex<Vec<PlayerCall>>,
    spots_rx: Mutex<Option<mpsc::Receiver<Spot>>>,
    pub(crate) play_result: AtomicBool,
}

impl FakePlayer {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Sender<Spot>) {
        let (state_tx, _) = watch::channel(PlayerState::New);
        let (spots_tx, spots_rx) = mpsc::channel(16);
        let player = Arc::new(Self {
            state_tx,
            calls: Mutex::new(Vec::new()),
            spots_rx: Mutex::new(Some(spots_rx)),
            play_result: AtomicBool::new(true),
        });
        (player, spots_tx)
    }

    pub(crate) fn calls(&self) -> Vec<PlayerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, call: &PlayerCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl LivestreamPlayer for FakePlayer {
    async fn play(&self, token: &StreamToken) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push(PlayerCall::Play(token.clone()));
        self.play_result.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.calls.lock().unwrap().push(PlayerCall::Stop);
    }

    fn mute(&self) {
        self.calls.lock().unwrap().push(PlayerCall::Mute);
    }

    fn unmute(&self) {
        self.calls.lock().unwrap().push(PlayerCall::Unmute);
    }

    fn current(&self) -> watch::Receiver<PlayerState> {
        self.state_tx.subscribe()
    }

    fn take_spots(&self) -> Option<mpsc::Receiver<Spot>> {
        self.spots_rx.lock().unwrap().take()
    }

    fn track_spot_play_for(&self, spot: &Spot) {
        self.calls
            .lock()
            .unwrap()
            .push(PlayerCall::TrackSpot(spot.id.clone()));
    }
}

pub(crate) struct FakeSpotAudio {
    pub(crate) started: Mutex<Vec<String>>,
    current: Mutex<Option<Spot>>,
    finished: AtomicBool,
    position: AtomicU64,
    pub(crate) start_result: AtomicBool,
    pub(crate) stops: AtomicU32,
}

impl FakeSpotAudio {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            finished: AtomicBool::new(false),
            position: AtomicU64::new(0),
            start_result: AtomicBool::new(true),
            stops: AtomicU32::new(0),
        })
    }

    /// Simulate the current spot reaching its end.
    pub(crate) fn finish_current(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_position(&self, ms: u64) {
        self.position.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn started_ids(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpotAudio for FakeSpotAudio {
    async fn start(&self, spot: &Spot) -> bool {
        if !self.start_result.load(Ordering::SeqCst) {
            return false;
        }
        self.started.lock().unwrap().push(spot.id.clone());
        *self.current.lock().unwrap() = Some(spot.clone());
        self.finished.store(false, Ordering::SeqCst);
        self.position.store(0, Ordering::SeqCst);
        true
    }

    fn position_ms(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NotifierEvent {
    Shown(NotificationKind),
    Dismissed(NotificationKind),
}

/// Notifier that records show/dismiss events. Dismissing a kind that is not
/// active is a no-op, matching the status-line notifier.
pub(crate) struct RecordingNotifier {
    pub(crate) events: Mutex<Vec<NotifierEvent>>,
    active: Mutex<Vec<NotificationKind>>,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn shown_count(&self, kind: NotificationKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == NotifierEvent::Shown(kind))
            .count()
    }

    pub(crate) fn dismissed_count(&self, kind: NotificationKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == NotifierEvent::Dismissed(kind))
            .count()
    }

    pub(crate) fn is_active(&self, kind: NotificationKind) -> bool {
        self.active.lock().unwrap().contains(&kind)
    }

    pub(crate) fn active_kinds(&self) -> Vec<NotificationKind> {
        self.active.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, _text: String) {
        let mut active = self.active.lock().unwrap();
        if !active.contains(&kind) {
            active.push(kind);
        }
        self.events.lock().unwrap().push(NotifierEvent::Shown(kind));
    }

    fn dismiss(&self, kind: NotificationKind) {
        let mut active = self.active.lock().unwrap();
        if let Some(index) = active.iter().position(|k| *k == kind) {
            active.remove(index);
            self.events
                .lock()
                .unwrap()
                .push(NotifierEvent::Dismissed(kind));
        }
    }
}

/// One full set of fakes wired into `SessionHandles`.
pub(crate) struct Harness {
    pub(crate) connection: Arc<FakeConnection>,
    pub(crate) loader: Arc<FakeLoader>,
    pub(crate) container: Arc<FakeContainer>,
    pub(crate) player: Arc<FakePlayer>,
    pub(crate) spots_tx: mpsc::Sender<Spot>,
    pub(crate) spot_audio: Arc<FakeSpotAudio>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) play_state: PlayStateStore,
    pub(crate) spot_play: SpotPlayStore,
}

impl Harness {
    /// Harness primed with broadcaster 42 streaming under token "abc".
    pub(crate) fn new() -> Self {
        let (player, spots_tx) = FakePlayer::new();
        Self {
            connection: FakeConnection::new(),
            loader: FakeLoader::new(),
            container: FakeContainer::new(Some(livestream("abc", 42))),
            player,
            spots_tx,
            spot_audio: FakeSpotAudio::new(),
            notifier: RecordingNotifier::new(),
            play_state: PlayStateStore::new(),
            spot_play: SpotPlayStore::new(),
        }
    }

    pub(crate) fn handles(&self) -> SessionHandles {
        SessionHandles {
            connection: self.connection.clone(),
            loader: self.loader.clone(),
            container: self.container.clone(),
            player: self.player.clone(),
            spot_audio: self.spot_audio.clone(),
            notifier: self.notifier.clone(),
            play_state: self.play_state.clone(),
            spot_play: self.spot_play.clone(),
        }
    }

    pub(crate) fn start_request(&self) -> StartPlayback {
        StartPlayback {
            token: Some("abc".into()),
            broadcaster_id: Some(BroadcasterId(42)),
            title: "Local derby".to_string(),
            language: "en".to_string(),
        }
    }
}
