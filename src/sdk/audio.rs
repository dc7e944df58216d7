//! Audio playback for the reference backend: the livestream player streams
//! HTTP audio through symphonia into a rodio sink, the spot player fetches a
//! whole spot file and plays it on its own sink.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamHandle, Sink};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::utils::parsing;

use super::http::BackendClient;
use super::{LivestreamPlayer, PlayerState, Spot, SpotAudio, StreamToken};

/// Keep at most this much un-decoded audio around.
const MAX_BUFFER_BYTES: usize = 8 * 1024 * 1024;
/// Compact the buffer once this much of it has been consumed.
const CLEANUP_BYTES: usize = 2 * 1024 * 1024;
/// Throttle decoding when this many decoded chunks are queued on the sink.
const MAX_QUEUED_CHUNKS: usize = 32;
/// How often the upstream spot listing is polled while a stream plays.
const SPOT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Bytes shared between the network pump (writer) and the decoder (reader).
struct StreamBuffer {
    state: Mutex<BufferState>,
    cancel: CancellationToken,
}

struct BufferState {
    data: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl StreamBuffer {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(BufferState {
                data: Vec::new(),
                pos: 0,
                closed: false,
            }),
            cancel,
        }
    }

    fn push(&self, chunk: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pos > CLEANUP_BYTES {
            let pos = state.pos;
            state.data.drain(..pos);
            state.pos = 0;
        }
        state.data.extend_from_slice(chunk);
    }

    fn buffered(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.data.len() - state.pos
    }

    /// No more bytes will arrive; readers drain what is left and then see EOF.
    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
    }
}

/// Blocking `Read` view over a [`StreamBuffer`] for symphonia. Waits for data
/// instead of reporting a premature end of stream; returns EOF only once the
/// buffer is closed or playback is cancelled.
struct StreamBufferReader {
    buffer: Arc<StreamBuffer>,
}

impl Read for StreamBufferReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            {
                let mut state = self
                    .buffer
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if state.pos < state.data.len() {
                    let n = buf.len().min(state.data.len() - state.pos);
                    buf[..n].copy_from_slice(&state.data[state.pos..state.pos + n]);
                    state.pos += n;
                    return Ok(n);
                }
                if state.closed {
                    return Ok(0);
                }
            }
            if self.buffer.cancel.is_cancelled() {
                return Ok(0);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Seek for StreamBufferReader {
    fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "live streams are not seekable",
        ))
    }
}

impl MediaSource for StreamBufferReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Interleave one decoded packet into `out` as f32 samples.
fn append_samples(audio_buf: &AudioBufferRef<'_>, out: &mut Vec<f32>) {
    macro_rules! interleave {
        ($planes:expr, $convert:expr) => {{
            let planes = $planes;
            let frames = planes.frames();
            let channels = planes.spec().channels.count();
            for frame in 0..frames {
                for ch in 0..channels {
                    out.push($convert(planes.chan(ch)[frame]));
                }
            }
        }};
    }

    match audio_buf {
        AudioBufferRef::F32(buf) => interleave!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => interleave!(buf, |s: f64| s as f32),
        AudioBufferRef::S16(buf) => interleave!(buf, |s: i16| s as f32 / i16::MAX as f32),
        AudioBufferRef::S32(buf) => interleave!(buf, |s: i32| s as f32 / i32::MAX as f32),
        AudioBufferRef::U8(buf) => interleave!(buf, |s: u8| (s as i16 - 128) as f32 / 128.0),
        _ => debug!("unsupported sample format, skipping packet"),
    }
}

/// Resolve playlist indirections (.pls/.m3u) to the actual stream URL.
async fn resolve_stream_url(http: &reqwest::Client, url: &str) -> Result<String> {
    if !parsing::is_playlist_url(url) {
        return Ok(url.to_string());
    }
    let content = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("reading playlist")?;
    parsing::parse_playlist(url, &content)
}

async fn fetch_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let bytes = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}

struct ActivePlayback {
    sink: Option<Arc<Sink>>,
    muted: bool,
    cancel: Option<CancellationToken>,
}

/// Livestream player on top of [`BackendClient`] stream URLs.
///
/// `play` starts a network pump plus a blocking decode task and reports
/// progress through the player-state sequence: `Connecting` once the request
/// is out, `Playing` when decoding starts, `Disconnected` on a mid-stream
/// loss, `Failed` when a stream cannot be brought up at all.
pub struct StreamAudioPlayer {
    backend: Arc<BackendClient>,
    http: reqwest::Client,
    output: OutputStreamHandle,
    state_tx: Arc<watch::Sender<PlayerState>>,
    spots_tx: mpsc::Sender<Spot>,
    spots_rx: Mutex<Option<mpsc::Receiver<Spot>>>,
    active: Arc<Mutex<ActivePlayback>>,
}

enum StreamOutcome {
    Cancelled,
    /// Never produced audio.
    Failed(anyhow::Error),
    /// Produced audio, then the stream broke off.
    Lost(anyhow::Error),
}

impl StreamAudioPlayer {
    pub fn new(backend: Arc<BackendClient>, output: OutputStreamHandle) -> Result<Self> {
        let (state_tx, _) = watch::channel(PlayerState::New);
        let (spots_tx, spots_rx) = mpsc::channel(16);
        // no overall request timeout: the stream request stays open for the
        // whole playback
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            backend,
            http,
            output,
            state_tx: Arc::new(state_tx),
            spots_tx,
            spots_rx: Mutex::new(Some(spots_rx)),
            active: Arc::new(Mutex::new(ActivePlayback {
                sink: None,
                muted: false,
                cancel: None,
            })),
        })
    }

    /// Tear down any running playback without publishing a state change.
    fn cancel_active(&self) {
        let (sink, cancel) = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            (active.sink.take(), active.cancel.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(sink) = sink {
            sink.stop();
        }
    }
}

#[async_trait]
impl LivestreamPlayer for StreamAudioPlayer {
    async fn play(&self, token: &StreamToken) -> bool {
        self.cancel_active();

        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active.cancel = Some(cancel.clone());
        }
        self.state_tx
            .send_replace(PlayerState::Connecting(token.clone()));

        tokio::spawn(poll_spots(
            self.backend.clone(),
            token.clone(),
            self.spots_tx.clone(),
            cancel.clone(),
        ));

        let http = self.http.clone();
        let output = self.output.clone();
        let active = self.active.clone();
        let state_tx = self.state_tx.clone();
        let url = self.backend.stream_url(token);
        let token = token.clone();
        tokio::spawn(async move {
            let outcome = run_stream(
                http,
                output,
                active,
                state_tx.clone(),
                token.clone(),
                url,
                cancel,
            )
            .await;
            match outcome {
                StreamOutcome::Cancelled => {}
                StreamOutcome::Failed(e) => {
                    warn!("stream {} could not be played: {:#}", token, e);
                    state_tx.send_replace(PlayerState::Failed);
                }
                StreamOutcome::Lost(e) => {
                    warn!("stream {} broke off: {:#}", token, e);
                    state_tx.send_replace(PlayerState::Disconnected(token));
                }
            }
        });

        true
    }

    async fn stop(&self) {
        let had_playback = {
            let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active.sink.is_some() || active.cancel.is_some()
        };
        self.cancel_active();
        if had_playback {
            self.state_tx.send_replace(PlayerState::Closed);
        }
    }

    fn mute(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.muted = true;
        if let Some(sink) = &active.sink {
            sink.set_volume(0.0);
        }
    }

    fn unmute(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.muted = false;
        if let Some(sink) = &active.sink {
            sink.set_volume(1.0);
        }
    }

    fn current(&self) -> watch::Receiver<PlayerState> {
        self.state_tx.subscribe()
    }

    fn take_spots(&self) -> Option<mpsc::Receiver<Spot>> {
        self.spots_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn track_spot_play_for(&self, spot: &Spot) {
        let backend = self.backend.clone();
        let id = spot.id.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.track_spot_play(&id).await {
                warn!("spot play tracking failed for {}: {:#}", id, e);
            }
        });
    }
}

/// Fetch the stream and feed it through the decoder until it ends, breaks or
/// is cancelled.
async fn run_stream(
    http: reqwest::Client,
    output: OutputStreamHandle,
    active: Arc<Mutex<ActivePlayback>>,
    state_tx: Arc<watch::Sender<PlayerState>>,
    token: StreamToken,
    url: String,
    cancel: CancellationToken,
) -> StreamOutcome {
    let stream_url = match resolve_stream_url(&http, &url).await {
        Ok(resolved) => resolved,
        Err(e) => return StreamOutcome::Failed(e),
    };
    debug!("fetching stream {} from {}", token, stream_url);

    let response = match http.get(&stream_url).send().await {
        Ok(response) => match response.error_for_status() {
            Ok(response) => response,
            Err(e) => return StreamOutcome::Failed(e.into()),
        },
        Err(e) => return StreamOutcome::Failed(e.into()),
    };

    let sink = match Sink::try_new(&output) {
        Ok(sink) => Arc::new(sink),
        Err(e) => return StreamOutcome::Failed(e.into()),
    };
    {
        let mut active = active.lock().unwrap_or_else(PoisonError::into_inner);
        sink.set_volume(if active.muted { 0.0 } else { 1.0 });
        active.sink = Some(sink.clone());
    }

    let buffer = Arc::new(StreamBuffer::new(cancel.clone()));
    let pump = tokio::spawn(pump_network(response, buffer.clone()));

    let played = Arc::new(AtomicBool::new(false));
    let decode = {
        let buffer = buffer.clone();
        let cancel = cancel.clone();
        let played = played.clone();
        let state_tx = state_tx.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || {
            decode_stream(buffer, sink, cancel, move || {
                played.store(true, Ordering::SeqCst);
                state_tx.send_replace(PlayerState::Playing(token));
            })
        })
    };

    let decode_result = match decode.await {
        Ok(result) => result,
        Err(e) => Err(anyhow!("decode task panicked: {}", e)),
    };
    // `stop` or a replacing `play` cancelled us; afterwards we cancel
    // ourselves just to release the pump, so sample the flag first
    let stop_requested = cancel.is_cancelled();
    cancel.cancel();
    buffer.close();
    let pump_result = match pump.await {
        Ok(result) => result,
        Err(e) => Err(anyhow!("network task panicked: {}", e)),
    };

    if stop_requested {
        return StreamOutcome::Cancelled;
    }

    let error = decode_result
        .and(pump_result)
        .err()
        .unwrap_or_else(|| anyhow!("stream ended"));
    if played.load(Ordering::SeqCst) {
        StreamOutcome::Lost(error)
    } else {
        StreamOutcome::Failed(error)
    }
}

async fn pump_network(response: reqwest::Response, buffer: Arc<StreamBuffer>) -> Result<()> {
    let mut stream = response.bytes_stream();
    let result = loop {
        let chunk = tokio::select! {
            _ = buffer.cancel.cancelled() => break Ok(()),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break Ok(());
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => break Err(anyhow::Error::from(e).context("reading stream body")),
        };

        while buffer.buffered() > MAX_BUFFER_BYTES {
            tokio::select! {
                _ = buffer.cancel.cancelled() => {
                    buffer.close();
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
        buffer.push(&chunk);
    };
    buffer.close();
    result
}

/// Blocking decode loop: probe the container, then decode packets onto the
/// sink until the buffer reports EOF. `on_playing` fires once the decoder is
/// up and audio is about to flow.
fn decode_stream(
    buffer: Arc<StreamBuffer>,
    sink: Arc<Sink>,
    cancel: CancellationToken,
    on_playing: impl FnOnce(),
) -> Result<()> {
    let source = StreamBufferReader {
        buffer: buffer.clone(),
    };
    let mss = MediaSourceStream::new(
        Box::new(source) as Box<dyn MediaSource>,
        MediaSourceStreamOptions::default(),
    );
    let probed = get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("probing stream format")?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("stream has no audio track"))?;
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("creating decoder")?;
    debug!(
        "decoding stream: codec={:?} rate={:?} channels={:?}",
        track.codec_params.codec, track.codec_params.sample_rate, track.codec_params.channels
    );
    on_playing();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                // buffer closed and drained
                return Ok(());
            }
            Err(e) => return Err(anyhow::Error::from(e).context("reading packet")),
        };

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                let spec = *audio_buf.spec();
                let channels = spec.channels.count();
                let mut samples = Vec::with_capacity(audio_buf.frames() * channels);
                append_samples(&audio_buf, &mut samples);
                if samples.is_empty() {
                    continue;
                }

                // don't decode arbitrarily far ahead of playback
                while sink.len() > MAX_QUEUED_CHUNKS {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                sink.append(SamplesBuffer::new(channels as u16, spec.rate, samples));
                sink.play();
            }
            // bad frame, skip it
            Err(SymphoniaError::DecodeError(e)) => debug!("skipping broken frame: {}", e),
            Err(e) => return Err(anyhow::Error::from(e).context("decoding packet")),
        }
    }
}

/// Poll the upstream spot listing for the playing stream and forward new
/// spots, oldest first, into the session's spot channel.
async fn poll_spots(
    backend: Arc<BackendClient>,
    token: StreamToken,
    tx: mpsc::Sender<Spot>,
    cancel: CancellationToken,
) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ticker = tokio::time::interval(SPOT_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match backend.fetch_spots(&token).await {
            Ok(spots) => {
                for spot in spots {
                    if seen.insert(spot.id.clone()) && tx.send(spot).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => debug!("spot poll for {} failed: {:#}", token, e),
        }
    }
}

struct ActiveSpot {
    sink: Sink,
    started_at: Instant,
    duration_ms: u64,
}

/// Spot playback on its own sink, so the (muted) main stream keeps running
/// underneath.
pub struct RodioSpotAudio {
    http: reqwest::Client,
    output: OutputStreamHandle,
    active: Mutex<Option<ActiveSpot>>,
}

impl RodioSpotAudio {
    pub fn new(output: OutputStreamHandle) -> Self {
        Self {
            http: reqwest::Client::new(),
            output,
            active: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpotAudio for RodioSpotAudio {
    async fn start(&self, spot: &Spot) -> bool {
        self.stop();

        // spot files are short, fetch them whole before playing
        let bytes = match fetch_bytes(&self.http, &spot.audio_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("fetching spot {} audio failed: {:#}", spot.id, e);
                return false;
            }
        };
        let decoder = match rodio::Decoder::new(Cursor::new(bytes)) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("decoding spot {} audio failed: {}", spot.id, e);
                return false;
            }
        };
        let sink = match Sink::try_new(&self.output) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("no audio output for spot {}: {}", spot.id, e);
                return false;
            }
        };

        sink.append(decoder);
        sink.play();
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        *active = Some(ActiveSpot {
            sink,
            started_at: Instant::now(),
            duration_ms: spot.duration_ms,
        });
        true
    }

    fn position_ms(&self) -> u64 {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(spot) => {
                let elapsed = spot.started_at.elapsed().as_millis() as u64;
                if spot.duration_ms > 0 {
                    elapsed.min(spot.duration_ms)
                } else {
                    elapsed
                }
            }
            None => 0,
        }
    }

    fn is_finished(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(spot) => spot.sink.empty(),
            None => true,
        }
    }

    fn stop(&self) {
        let taken = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active.take()
        };
        if let Some(spot) = taken {
            spot.sink.stop();
        }
    }
}
