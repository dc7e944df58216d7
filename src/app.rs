use anyhow::Result;
use crossterm::event::KeyCode;
use log::warn;
use ratatui::widgets::ListState;
use tokio::sync::{mpsc, watch};

use crate::actions::{BootstrapOutcome, Request, Response};
use crate::notify::{Notification, StatusNotifier};
use crate::play_state::PlayState;
use crate::sdk::{ConnectionState, Livestream};
use crate::service::PlayService;
use crate::session::{SessionHandles, StartPlayback};
use crate::spot_play::SpotPlayState;
use std::sync::Arc;

/// Which screen the terminal shows, driven by the connection-state sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// No usable location yet; connecting is pointless until there is one.
    LocationNeeded,
    Connecting,
    /// The connection attempt failed outright.
    ConnectionFailed,
    /// Connected; browse and play livestreams.
    Livestreams,
    /// A previously established connection was closed.
    Disconnected,
}

pub struct UiState {
    pub screen: Screen,
    pub livestreams: Vec<Livestream>,
    pub selected: usize,
    pub list_state: ListState,
    pub play_state: Option<PlayState>,
    pub spot: SpotPlayState,
    pub notifications: Vec<Notification>,
    pub status_message: String,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub should_quit: bool,
}

impl UiState {
    fn new() -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));
        Self {
            screen: Screen::Connecting,
            livestreams: Vec::new(),
            selected: 0,
            list_state,
            play_state: None,
            spot: SpotPlayState::default(),
            notifications: Vec::new(),
            status_message: String::new(),
            is_loading: false,
            is_refreshing: false,
            should_quit: false,
        }
    }

    pub fn selected_stream(&self) -> Option<&Livestream> {
        self.livestreams.get(self.selected)
    }

    pub fn select(&mut self, index: usize) {
        if index < self.livestreams.len() {
            self.selected = index;
            self.list_state.select(Some(index));
        }
    }

    pub fn next_stream(&mut self) {
        if !self.livestreams.is_empty() {
            let next = (self.selected + 1) % self.livestreams.len();
            self.select(next);
        }
    }

    pub fn previous_stream(&mut self) {
        if !self.livestreams.is_empty() {
            let previous = if self.selected == 0 {
                self.livestreams.len() - 1
            } else {
                self.selected - 1
            };
            self.select(previous);
        }
    }

    fn select_by_number(&mut self, digit: char) {
        if let Some(number) = digit.to_digit(10) {
            let number = number as usize;
            if number > 0 && number <= self.livestreams.len() {
                self.select(number - 1);
            }
        }
    }

    /// Token of the stream a session currently exists for, if any.
    pub fn playing_token(&self) -> Option<&crate::sdk::StreamToken> {
        self.play_state.as_ref().map(|state| state.stream_token())
    }
}

/// Owns the UI state and reacts to key events, worker responses and the
/// watch sequences published by the connection, container, stores and
/// notifier.
pub struct AppController {
    pub ui: UiState,
    service: Arc<PlayService>,
    req_tx: mpsc::Sender<Request>,
    conn_rx: watch::Receiver<ConnectionState>,
    online_rx: watch::Receiver<Vec<Livestream>>,
    play_rx: watch::Receiver<Option<PlayState>>,
    spot_rx: watch::Receiver<SpotPlayState>,
    notif_rx: watch::Receiver<Vec<Notification>>,
}

impl AppController {
    pub fn new(
        handles: &SessionHandles,
        notifier: &StatusNotifier,
        service: Arc<PlayService>,
        req_tx: mpsc::Sender<Request>,
    ) -> Self {
        Self {
            ui: UiState::new(),
            service,
            req_tx,
            conn_rx: handles.connection.state(),
            online_rx: handles.container.online(),
            play_rx: handles.play_state.subscribe(),
            spot_rx: handles.spot_play.subscribe(),
            notif_rx: notifier.subscribe(),
        }
    }

    /// Kick things off from whatever state the connection is already in.
    pub fn initialize(&mut self) {
        let state = *self.conn_rx.borrow_and_update();
        self.apply_connection_state(state);
    }

    /// Pull pending changes out of all watch sequences. Called once per frame.
    pub fn poll_updates(&mut self) {
        if self.conn_rx.has_changed().unwrap_or(false) {
            let state = *self.conn_rx.borrow_and_update();
            self.apply_connection_state(state);
        }
        if self.online_rx.has_changed().unwrap_or(false) {
            let livestreams = self.online_rx.borrow_and_update().clone();
            self.apply_livestreams(livestreams);
        }
        if self.play_rx.has_changed().unwrap_or(false) {
            self.ui.play_state = self.play_rx.borrow_and_update().clone();
        }
        if self.spot_rx.has_changed().unwrap_or(false) {
            self.ui.spot = self.spot_rx.borrow_and_update().clone();
        }
        if self.notif_rx.has_changed().unwrap_or(false) {
            self.ui.notifications = self.notif_rx.borrow_and_update().clone();
        }
    }

    fn apply_connection_state(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::New => {
                self.ui.screen = Screen::Connecting;
                self.request_bootstrap();
            }
            ConnectionState::Connecting => self.ui.screen = Screen::Connecting,
            ConnectionState::Connected => {
                self.ui.screen = Screen::Livestreams;
                self.request_load(false);
            }
            ConnectionState::Disconnected => self.ui.screen = Screen::Disconnected,
        }
    }

    fn apply_livestreams(&mut self, livestreams: Vec<Livestream>) {
        let had_none = self.ui.livestreams.is_empty();
        self.ui.livestreams = livestreams;
        if self.ui.selected >= self.ui.livestreams.len() {
            self.ui.selected = self.ui.livestreams.len().saturating_sub(1);
        }
        if had_none && !self.ui.livestreams.is_empty() {
            self.ui.select(0);
        } else {
            self.ui.list_state.select(Some(self.ui.selected));
        }
    }

    fn request_bootstrap(&self) {
        let _ = self.req_tx.try_send(Request::Bootstrap);
    }

    fn request_load(&mut self, refresh: bool) {
        if refresh {
            self.ui.is_refreshing = true;
        } else {
            self.ui.is_loading = true;
        }
        if self
            .req_tx
            .try_send(Request::LoadLivestreams { refresh })
            .is_err()
        {
            self.ui.is_loading = false;
            self.ui.is_refreshing = false;
        }
    }

    pub fn process_response(&mut self, response: Response) {
        match response {
            Response::BootstrapFinished(outcome) => match outcome {
                BootstrapOutcome::MissingLocation => self.ui.screen = Screen::LocationNeeded,
                BootstrapOutcome::ConnectFailed => self.ui.screen = Screen::ConnectionFailed,
                // the connection-state sequence routes us on
                BootstrapOutcome::Connected => {}
            },
            Response::LivestreamsLoaded { refresh, ok } => {
                if refresh {
                    self.ui.is_refreshing = false;
                } else {
                    self.ui.is_loading = false;
                }
                if !ok {
                    self.ui.status_message = "Loading livestreams failed".to_string();
                }
            }
        }
    }

    /// Returns `true` when the application should quit.
    pub async fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.quit().await;
                return Ok(true);
            }
            KeyCode::Up => self.ui.previous_stream(),
            KeyCode::Down => self.ui.next_stream(),
            KeyCode::Enter => self.toggle_playback().await?,
            KeyCode::Char('r') | KeyCode::Char('R') => {
                if self.ui.screen == Screen::Livestreams && !self.ui.is_refreshing {
                    self.request_load(true);
                }
            }
            KeyCode::Char('c') | KeyCode::Char('C') => self.retry_connect(),
            KeyCode::Char(c) if c.is_ascii_digit() => self.ui.select_by_number(c),
            _ => {}
        }
        Ok(false)
    }

    fn retry_connect(&mut self) {
        if matches!(
            self.ui.screen,
            Screen::LocationNeeded | Screen::ConnectionFailed | Screen::Disconnected
        ) {
            self.ui.screen = Screen::Connecting;
            self.request_bootstrap();
        }
    }

    /// Enter on the playing stream stops it; on any other stream it starts a
    /// session for that stream, replacing whatever was playing.
    async fn toggle_playback(&mut self) -> Result<()> {
        if self.ui.screen != Screen::Livestreams {
            return Ok(());
        }
        let Some(stream) = self.ui.selected_stream().cloned() else {
            return Ok(());
        };

        if let Some(play_state) = &self.ui.play_state {
            if play_state.stream_token() == &stream.token {
                self.service.stop().await;
                return Ok(());
            }
        }

        let request = StartPlayback {
            token: Some(stream.token.clone()),
            broadcaster_id: Some(stream.broadcaster_id),
            title: stream.title.clone(),
            language: stream.language.clone(),
        };
        if let Err(e) = self.service.start(request).await {
            warn!("could not start playback: {:#}", e);
            self.ui.status_message = "Could not start playback".to_string();
        }
        Ok(())
    }

    pub async fn quit(&mut self) {
        self.service.stop().await;
        self.ui.should_quit = true;
    }
}
