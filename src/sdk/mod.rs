//! Seams to the upstream livestream service.
//!
//! Everything the rest of the application knows about the remote side goes
//! through the traits in this module: connecting, discovering livestreams,
//! playing a stream, playing spot audio and resolving a device location.
//! `http` and `audio` provide reference implementations backed by a plain
//! HTTP/JSON endpoint and a rodio output; tests substitute their own.

pub mod audio;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

/// Opaque identifier of one livestream. A new token is issued every time a
/// broadcaster (re-)starts their stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamToken(pub String);

impl StreamToken {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for StreamToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the person broadcasting a livestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcasterId(pub u64);

impl std::fmt::Display for BroadcasterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One currently active livestream as reported by the discovery endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Livestream {
    pub token: StreamToken,
    pub broadcaster_id: BroadcasterId,
    pub title: String,
    pub language: String,
    pub listeners: u32,
}

/// Optional banner shown while a spot plays.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotBanner {
    pub caption: String,
    pub link_url: String,
}

/// An advertisement unit delivered by the upstream player while the main
/// stream is playing.
#[derive(Debug, Clone, PartialEq)]
pub struct Spot {
    pub id: String,
    pub audio_url: String,
    pub duration_ms: u64,
    pub banner: Option<SpotBanner>,
}

/// Connection to the upstream service as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
}

/// State of the upstream livestream player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerState {
    /// Initial state, nothing requested yet.
    New,
    Connecting(StreamToken),
    Playing(StreamToken),
    Disconnected(StreamToken),
    /// Unrecoverable player failure.
    Failed,
    /// The player was stopped and released.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Connection to the upstream backend.
///
/// `state` is a restartable sequence: every call returns a fresh receiver
/// primed with the current state.
#[async_trait]
pub trait Connection: Send + Sync {
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Initial connection attempt. `false` means the attempt failed without
    /// changing the published state to `Disconnected`.
    async fn connect(&self) -> bool;

    /// Re-establish a previously lost connection. A successful reconnect is
    /// observable as a `Connected` emission on `state`.
    async fn reconnect(&self) -> bool;
}

/// Refreshes the set of currently active livestreams.
#[async_trait]
pub trait LivestreamLoader: Send + Sync {
    /// Fetch the current listing and publish it into the container.
    /// `false` means the listing could not be refreshed.
    async fn load(&self) -> bool;
}

/// Read access to the most recently loaded livestream listing.
pub trait LivestreamContainer: Send + Sync {
    /// All currently online livestreams.
    fn online(&self) -> watch::Receiver<Vec<Livestream>>;

    /// The livestream of one broadcaster, `None` while the broadcaster has no
    /// active stream. Each call returns a fresh receiver primed with the
    /// current lookup result.
    fn by_broadcaster(&self, id: BroadcasterId) -> watch::Receiver<Option<Livestream>>;
}

/// The upstream livestream player.
#[async_trait]
pub trait LivestreamPlayer: Send + Sync {
    /// Start playing the given stream. `false` means the play request was
    /// rejected outright; asynchronous progress is reported via `current`.
    async fn play(&self, token: &StreamToken) -> bool;

    async fn stop(&self);

    /// Silence the main stream without interrupting it. Used while spots play.
    fn mute(&self);

    fn unmute(&self);

    /// Player state sequence, primed with the current state.
    fn current(&self) -> watch::Receiver<PlayerState>;

    /// Spot arrivals. Single-subscriber: the first caller takes the receiver,
    /// later calls get `None`.
    fn take_spots(&self) -> Option<mpsc::Receiver<Spot>>;

    /// Report a spot whose local playback finished, for upstream tracking.
    fn track_spot_play_for(&self, spot: &Spot);
}

/// Local audio output for spot files, separate from the main stream.
#[async_trait]
pub trait SpotAudio: Send + Sync {
    /// Begin playback of the spot's audio. `false` if the audio could not be
    /// fetched or decoded.
    async fn start(&self, spot: &Spot) -> bool;

    /// Elapsed playback time of the current spot in milliseconds.
    fn position_ms(&self) -> u64;

    /// Whether the current spot has finished playing.
    fn is_finished(&self) -> bool;

    /// Stop and discard any spot playback in progress.
    fn stop(&self);
}

/// Single-shot device location. Cancelled by dropping the future.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn locate(&self) -> Option<Coordinates>;
}

/// Location source fed from CLI flags. Yields `None` when no coordinates were
/// given, which the connect flow surfaces as its own screen.
pub struct StaticLocationProvider {
    coordinates: Option<Coordinates>,
}

impl StaticLocationProvider {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        let coordinates = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self { coordinates }
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn locate(&self) -> Option<Coordinates> {
        self.coordinates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_location_requires_both_coordinates() {
        let provider = StaticLocationProvider::new(Some(48.1), None);
        assert_eq!(provider.locate().await, None);

        let provider = StaticLocationProvider::new(Some(48.1), Some(11.5));
        let location = provider.locate().await.unwrap();
        assert_eq!(location.latitude, 48.1);
        assert_eq!(location.longitude, 11.5);
    }
}
