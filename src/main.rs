mod actions;
mod app;
mod notify;
mod play_state;
mod sdk;
mod service;
mod session;
mod spot_play;
mod ui;
mod utils;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use app::AppController;
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::info;
use ratatui::{Terminal, backend::CrosstermBackend};
use rodio::OutputStream;
use tokio::sync::mpsc;
use tokio::time::sleep;

use notify::StatusNotifier;
use play_state::PlayStateStore;
use sdk::audio::{RodioSpotAudio, StreamAudioPlayer};
use sdk::http::{BackendClient, HttpConnection, HttpLivestreamLoader, SharedLivestreamContainer};
use sdk::{BroadcasterId, StaticLocationProvider, StreamToken};
use service::PlayService;
use session::{SessionConfig, SessionHandles, StartPlayback};
use spot_play::SpotPlayStore;

/// Terminal listener for PlayByEar livestreams.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Base URL of the livestream backend.
    #[arg(long, default_value = "http://127.0.0.1:8135")]
    endpoint: String,

    /// Latitude handed to the location provider.
    #[arg(long)]
    latitude: Option<f64>,

    /// Longitude handed to the location provider.
    #[arg(long)]
    longitude: Option<f64>,

    /// Sleep between failed reconnect attempts, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    reconnect_interval_ms: u64,

    /// Give up after this many failed reconnect attempts (default: retry
    /// forever).
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// How long to wait for a broadcaster to come back, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    broadcaster_grace_ms: u64,

    /// Play one stream without the terminal UI and block until Ctrl-C.
    #[arg(long)]
    headless: bool,

    /// Stream token to play in headless mode.
    #[arg(long, requires = "headless")]
    token: Option<String>,

    /// Broadcaster id of the stream to play in headless mode.
    #[arg(long, requires = "headless")]
    broadcaster: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // The output stream has to outlive every sink; the handle is what gets
    // shared around.
    let (_audio_stream, audio_handle) =
        OutputStream::try_default().context("opening audio output")?;

    let backend = Arc::new(BackendClient::new(&args.endpoint));
    let container = Arc::new(SharedLivestreamContainer::new());
    let connection = Arc::new(HttpConnection::new(backend.clone()));
    connection.spawn_probe_loop(Duration::from_secs(15));
    let loader = Arc::new(HttpLivestreamLoader::new(backend.clone(), container.clone()));
    let player = Arc::new(StreamAudioPlayer::new(backend.clone(), audio_handle.clone())?);
    let spot_audio = Arc::new(RodioSpotAudio::new(audio_handle));
    let location = Arc::new(StaticLocationProvider::new(args.latitude, args.longitude));
    let notifier = Arc::new(StatusNotifier::new());

    let handles = SessionHandles {
        connection: connection.clone(),
        loader: loader.clone(),
        container: container.clone(),
        player,
        spot_audio,
        notifier: notifier.clone(),
        play_state: PlayStateStore::new(),
        spot_play: SpotPlayStore::new(),
    };
    let config = SessionConfig {
        reconnect_interval: Duration::from_millis(args.reconnect_interval_ms),
        max_reconnect_attempts: args.max_reconnect_attempts,
        broadcaster_grace: Duration::from_millis(args.broadcaster_grace_ms),
        ..SessionConfig::default()
    };
    let service = Arc::new(PlayService::new(handles.clone(), config));

    if args.headless {
        return run_headless(&args, &handles, location, service).await;
    }

    let (req_tx, req_rx) = mpsc::channel(16);
    let (resp_tx, resp_rx) = mpsc::channel(16);
    tokio::spawn(actions::run_worker(
        req_rx,
        resp_tx,
        handles.connection.clone(),
        handles.loader.clone(),
        location,
    ));

    // restore the terminal even when we panic
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut controller = AppController::new(&handles, &notifier, service, req_tx);
    controller.initialize();
    let result = run_app(&mut terminal, &mut controller, resp_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    controller: &mut AppController,
    mut responses: mpsc::Receiver<actions::Response>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::render(f, &mut controller.ui))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if controller.handle_key(key.code).await? {
                    break;
                }
            }
        }

        while let Ok(response) = responses.try_recv() {
            controller.process_response(response);
        }
        controller.poll_updates();

        if controller.ui.should_quit {
            break;
        }

        sleep(Duration::from_millis(16)).await;
    }

    Ok(())
}

/// Connect, start one playback session and keep it running until Ctrl-C.
async fn run_headless(
    args: &Args,
    handles: &SessionHandles,
    location: Arc<StaticLocationProvider>,
    service: Arc<PlayService>,
) -> Result<()> {
    use sdk::{Connection, LivestreamLoader, LocationProvider};

    let Some(token) = args.token.clone() else {
        bail!("--headless needs --token");
    };
    let Some(broadcaster) = args.broadcaster else {
        bail!("--headless needs --broadcaster");
    };

    if location.locate().await.is_none() {
        bail!("no location available, pass --latitude and --longitude");
    }
    if !handles.connection.connect().await {
        bail!("could not connect to {}", args.endpoint);
    }
    if !handles.loader.load().await {
        bail!("could not load the livestream listing");
    }

    let token = StreamToken(token);
    let listing = handles.container.online().borrow().clone();
    let (title, language) = listing
        .iter()
        .find(|stream| stream.token == token)
        .map(|stream| (stream.title.clone(), stream.language.clone()))
        .unwrap_or_default();

    service
        .start(StartPlayback {
            token: Some(token),
            broadcaster_id: Some(BroadcasterId(broadcaster)),
            title,
            language,
        })
        .await?;
    info!("playing, Ctrl-C stops");

    tokio::signal::ctrl_c().await?;
    service.stop().await;
    Ok(())
}
