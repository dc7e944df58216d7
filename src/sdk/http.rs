//! Reference backend: livestream discovery, connectivity and spot tracking
//! against a plain HTTP/JSON endpoint. This is a stand-in for the real
//! upstream service, good enough to drive the demo; no protocol fidelity
//! beyond the few JSON shapes documented on the fetch methods.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Deserializer};
use tokio::sync::watch;

use super::{
    BroadcasterId, Connection, ConnectionState, Livestream, LivestreamContainer,
    LivestreamLoader, Spot, SpotBanner, StreamToken,
};

#[derive(Debug, Deserialize)]
struct LivestreamsResponse {
    livestreams: Vec<LivestreamRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LivestreamRecord {
    token: String,
    #[serde(deserialize_with = "deserialize_number")]
    streamer_id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    language: String,
    #[serde(default, deserialize_with = "deserialize_number")]
    listeners: u64,
}

#[derive(Debug, Deserialize)]
struct SpotsResponse {
    spots: Vec<SpotRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotRecord {
    id: String,
    audio_url: String,
    #[serde(default, deserialize_with = "deserialize_number")]
    duration_millis: u64,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    link_url: Option<String>,
}

/// The endpoint serves ids and counters both as numbers and as strings,
/// depending on its mood.
fn deserialize_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(u64),
    }

    match StringOrNumber::deserialize(deserializer) {
        Ok(StringOrNumber::String(s)) => s.parse().map_err(serde::de::Error::custom),
        Ok(StringOrNumber::Number(n)) => Ok(n),
        Err(_) => Ok(0),
    }
}

impl From<LivestreamRecord> for Livestream {
    fn from(record: LivestreamRecord) -> Self {
        Livestream {
            token: StreamToken(record.token),
            broadcaster_id: BroadcasterId(record.streamer_id),
            title: record.title,
            language: record.language,
            listeners: record.listeners.min(u32::MAX as u64) as u32,
        }
    }
}

impl From<SpotRecord> for Spot {
    fn from(record: SpotRecord) -> Self {
        let banner = record.caption.map(|caption| SpotBanner {
            caption,
            link_url: record.link_url.unwrap_or_default(),
        });
        Spot {
            id: record.id,
            audio_url: record.audio_url,
            duration_ms: record.duration_millis,
            banner,
        }
    }
}

/// HTTP client for the backend's JSON endpoints.
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// `GET /livestreams.json`, sorted by listener count.
    pub async fn fetch_livestreams(&self) -> Result<Vec<Livestream>> {
        let url = format!("{}/livestreams.json", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let mut listing: LivestreamsResponse = response.json().await?;
        listing
            .livestreams
            .sort_by(|a, b| b.listeners.cmp(&a.listeners));
        Ok(listing.livestreams.into_iter().map(Into::into).collect())
    }

    /// `GET /livestreams/{token}/spots.json`.
    pub async fn fetch_spots(&self, token: &StreamToken) -> Result<Vec<Spot>> {
        let url = format!("{}/livestreams/{}/spots.json", self.base_url, token);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let spots: SpotsResponse = response.json().await?;
        Ok(spots.spots.into_iter().map(Into::into).collect())
    }

    /// Report one finished spot playback for billing.
    pub async fn track_spot_play(&self, spot_id: &str) -> Result<()> {
        let url = format!("{}/spots/{}/play", self.base_url, spot_id);
        self.client.post(&url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Cheap connectivity check.
    pub async fn probe(&self) -> Result<()> {
        let url = format!("{}/status", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Audio stream location for one livestream.
    pub fn stream_url(&self, token: &StreamToken) -> String {
        format!("{}/livestreams/{}/stream", self.base_url, token)
    }
}

/// Holds the most recently loaded listing and derives per-broadcaster views.
pub struct SharedLivestreamContainer {
    online_tx: Arc<watch::Sender<Vec<Livestream>>>,
}

impl SharedLivestreamContainer {
    pub fn new() -> Self {
        let (online_tx, _) = watch::channel(Vec::new());
        Self {
            online_tx: Arc::new(online_tx),
        }
    }

    pub fn publish(&self, listing: Vec<Livestream>) {
        debug!("publishing {} online livestreams", listing.len());
        self.online_tx.send_replace(listing);
    }
}

impl Default for SharedLivestreamContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl LivestreamContainer for SharedLivestreamContainer {
    fn online(&self) -> watch::Receiver<Vec<Livestream>> {
        self.online_tx.subscribe()
    }

    fn by_broadcaster(&self, id: BroadcasterId) -> watch::Receiver<Option<Livestream>> {
        let mut online = self.online_tx.subscribe();
        let initial = online
            .borrow_and_update()
            .iter()
            .find(|stream| stream.broadcaster_id == id)
            .cloned();
        let (tx, rx) = watch::channel(initial);

        // forward listing changes as lookup results until the receiver is gone
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let found = online
                    .borrow_and_update()
                    .iter()
                    .find(|stream| stream.broadcaster_id == id)
                    .cloned();
                tx.send_if_modified(|current| {
                    if *current != found {
                        *current = found;
                        true
                    } else {
                        false
                    }
                });
                if tx.is_closed() {
                    break;
                }
            }
        });

        rx
    }
}

/// Loader that refreshes the shared container from the backend.
pub struct HttpLivestreamLoader {
    client: Arc<BackendClient>,
    container: Arc<SharedLivestreamContainer>,
}

impl HttpLivestreamLoader {
    pub fn new(client: Arc<BackendClient>, container: Arc<SharedLivestreamContainer>) -> Self {
        Self { client, container }
    }
}

#[async_trait]
impl LivestreamLoader for HttpLivestreamLoader {
    async fn load(&self) -> bool {
        match self.client.fetch_livestreams().await {
            Ok(listing) => {
                self.container.publish(listing);
                true
            }
            Err(e) => {
                warn!("livestream listing refresh failed: {}", e);
                false
            }
        }
    }
}

/// Probe-based connection. `connect` reports failure through its return value
/// without publishing `Disconnected`; loss mid-session is detected by the
/// periodic probe loop and published for the watchdog to handle.
pub struct HttpConnection {
    client: Arc<BackendClient>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl HttpConnection {
    pub fn new(client: Arc<BackendClient>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::New);
        Self {
            client,
            state_tx: Arc::new(state_tx),
        }
    }

    /// Background connectivity check while connected. Flips the published
    /// state to `Disconnected` when the backend stops answering.
    pub fn spawn_probe_loop(&self, interval: Duration) {
        let client = self.client.clone();
        let state_tx = self.state_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if *state_tx.borrow() != ConnectionState::Connected {
                    continue;
                }
                if client.probe().await.is_err() {
                    warn!("backend stopped answering, reporting connection loss");
                    state_tx.send_replace(ConnectionState::Disconnected);
                }
            }
        });
    }
}

#[async_trait]
impl Connection for HttpConnection {
    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn connect(&self) -> bool {
        self.state_tx.send_replace(ConnectionState::Connecting);
        match self.client.probe().await {
            Ok(()) => {
                self.state_tx.send_replace(ConnectionState::Connected);
                true
            }
            Err(e) => {
                warn!("connect failed: {}", e);
                self.state_tx.send_replace(ConnectionState::New);
                false
            }
        }
    }

    async fn reconnect(&self) -> bool {
        match self.client.probe().await {
            Ok(()) => {
                self.state_tx.send_replace(ConnectionState::Connected);
                true
            }
            Err(e) => {
                debug!("reconnect probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn livestream_records_accept_sloppy_fields() {
        let json = r#"{
            "livestreams": [
                {"token": "abc", "streamerId": "42", "title": "Derby", "language": "de", "listeners": 10},
                {"token": "def", "streamerId": 7, "listeners": "250"}
            ]
        }"#;

        let listing: LivestreamsResponse = serde_json::from_str(json).unwrap();
        let streams: Vec<Livestream> = listing.livestreams.into_iter().map(Into::into).collect();

        assert_eq!(streams[0].broadcaster_id, BroadcasterId(42));
        assert_eq!(streams[0].language, "de");
        assert_eq!(streams[1].broadcaster_id, BroadcasterId(7));
        assert_eq!(streams[1].listeners, 250);
        assert_eq!(streams[1].title, "");
    }

    #[test]
    fn spot_records_map_banners() {
        let json = r#"{
            "spots": [
                {"id": "s1", "audioUrl": "http://ads/s1.mp3", "durationMillis": 15000,
                 "caption": "Buy things", "linkUrl": "http://ads/s1"},
                {"id": "s2", "audioUrl": "http://ads/s2.mp3"}
            ]
        }"#;

        let spots: SpotsResponse = serde_json::from_str(json).unwrap();
        let spots: Vec<Spot> = spots.spots.into_iter().map(Into::into).collect();

        assert_eq!(spots[0].banner.as_ref().unwrap().caption, "Buy things");
        assert_eq!(spots[0].duration_ms, 15000);
        assert!(spots[1].banner.is_none());
        assert_eq!(spots[1].duration_ms, 0);
    }

    #[test]
    fn stream_urls_are_formed_from_the_base() {
        let client = BackendClient::new("http://backend.example/api/");
        assert_eq!(
            client.stream_url(&"abc".into()),
            "http://backend.example/api/livestreams/abc/stream"
        );
    }

    #[tokio::test]
    async fn by_broadcaster_follows_the_listing() {
        let container = SharedLivestreamContainer::new();
        let mut lookup = container.by_broadcaster(BroadcasterId(42));
        assert!(lookup.borrow_and_update().is_none());

        let stream = Livestream {
            token: "abc".into(),
            broadcaster_id: BroadcasterId(42),
            title: "Derby".to_string(),
            language: "de".to_string(),
            listeners: 10,
        };
        container.publish(vec![stream.clone()]);
        lookup.changed().await.unwrap();
        assert_eq!(lookup.borrow_and_update().as_ref(), Some(&stream));

        container.publish(Vec::new());
        lookup.changed().await.unwrap();
        assert!(lookup.borrow_and_update().is_none());
    }
}
