use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use crate::app::{Screen, UiState};
use crate::play_state::PlayState;

const HEADER_HEIGHT: u16 = 5;
const STATUS_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

const LANGUAGE_WIDTH: usize = 8;
const LISTENERS_WIDTH: usize = 6;
const SEPARATORS_WIDTH: usize = 6;
const MIN_TITLE_WIDTH: usize = 15;

pub fn render(f: &mut Frame, ui: &mut UiState) {
    match ui.screen {
        Screen::Connecting => render_message(
            f,
            "Connecting",
            "Connecting to the livestream service…",
            "Q quits",
        ),
        Screen::LocationNeeded => render_message(
            f,
            "Location needed",
            "No location is available, so the service cannot be used yet.",
            "Start with --latitude/--longitude, then press C to retry • Q quits",
        ),
        Screen::ConnectionFailed => render_message(
            f,
            "Connection failed",
            "The livestream service could not be reached.",
            "C retries • Q quits",
        ),
        Screen::Disconnected => render_message(
            f,
            "Disconnected",
            "The connection to the livestream service was closed.",
            "C reconnects • Q quits",
        ),
        Screen::Livestreams => render_livestreams(f, ui),
    }
}

fn render_message(f: &mut Frame, title: &str, text: &str, hint: &str) {
    let content = vec![
        Line::from(""),
        Line::from(Span::styled(
            text.to_string(),
            Style::default().fg(Color::White),
        )),
        Line::from(""),
        Line::from(Span::styled(
            hint.to_string(),
            Style::default().fg(Color::Gray),
        )),
    ];

    let paragraph = Paragraph::new(Text::from(content))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Magenta))
                .title(title.to_string()),
        );

    f.render_widget(paragraph, f.area());
}

fn render_livestreams(f: &mut Frame, ui: &mut UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(10),
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(f.area());

    render_header(f, chunks[0], ui);
    render_stream_list(f, chunks[1], ui);
    render_status(f, chunks[2], ui);
    render_footer(f, chunks[3]);
}

fn play_status_label(ui: &UiState) -> (&'static str, Color) {
    match &ui.play_state {
        Some(PlayState::Playing(_)) => ("PLAYING", Color::Green),
        Some(PlayState::Connecting(_)) => ("CONNECTING", Color::Yellow),
        None => ("STOPPED", Color::Gray),
    }
}

fn render_header(f: &mut Frame, area: Rect, ui: &UiState) {
    let (status, status_color) = play_status_label(ui);

    let mut content = vec![Line::from(vec![
        Span::styled(
            "PLAYBYEAR",
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(" livestream listener ", Style::default().fg(Color::Cyan)),
        Span::styled(
            status,
            Style::default()
                .fg(status_color)
                .add_modifier(Modifier::BOLD),
        ),
    ])];

    if let Some(stream) = ui.selected_stream() {
        content.push(Line::from(vec![
            Span::styled("Stream: ", Style::default()),
            Span::styled(
                stream.title.clone(),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" • ", Style::default().fg(Color::Gray)),
            Span::styled(stream.language.clone(), Style::default().fg(Color::Cyan)),
            Span::styled(" • ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} listeners", stream.listeners),
                Style::default().fg(Color::Green),
            ),
        ]));
    } else {
        content.push(Line::from(Span::styled(
            "No livestreams online",
            Style::default().fg(Color::Gray),
        )));
    }

    if let Some(spot) = &ui.spot.current {
        let caption = spot
            .banner
            .as_ref()
            .map(|banner| banner.caption.as_str())
            .unwrap_or("Advertisement");
        content.push(Line::from(vec![
            Span::styled("Spot: ", Style::default().fg(Color::Red)),
            Span::styled(caption.to_string(), Style::default().fg(Color::White)),
            Span::styled(
                format!(
                    " ({}s / {}s)",
                    ui.spot.elapsed_ms / 1000,
                    spot.duration_ms / 1000
                ),
                Style::default().fg(Color::Gray),
            ),
        ]));
    }

    let header = Paragraph::new(Text::from(content)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta))
            .title("Now Playing"),
    );

    f.render_widget(header, area);
}

fn render_stream_list(f: &mut Frame, area: Rect, ui: &mut UiState) {
    let available_width = area.width.saturating_sub(4) as usize;
    let fixed = LANGUAGE_WIDTH + LISTENERS_WIDTH + SEPARATORS_WIDTH;
    let title_width = available_width.saturating_sub(fixed).max(MIN_TITLE_WIDTH);

    let playing_token = ui.playing_token().cloned();
    let items: Vec<ListItem> = ui
        .livestreams
        .iter()
        .map(|stream| {
            let row = format!(
                "{} │ {} │ {:>5}",
                truncate(&stream.title, title_width),
                truncate(&stream.language, LANGUAGE_WIDTH),
                stream.listeners,
            );
            let item = ListItem::new(row);
            if Some(&stream.token) == playing_token.as_ref() {
                item.style(
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::DIM),
                )
            } else {
                item
            }
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(format!("Livestreams ({} online)", ui.livestreams.len())),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(" > ");

    f.render_stateful_widget(list, area, &mut ui.list_state);
}

fn render_status(f: &mut Frame, area: Rect, ui: &UiState) {
    let text = if ui.is_loading {
        "Loading livestreams…".to_string()
    } else if ui.is_refreshing {
        "Refreshing livestreams…".to_string()
    } else if !ui.notifications.is_empty() {
        ui.notifications
            .iter()
            .map(|notification| notification.text.as_str())
            .collect::<Vec<_>>()
            .join(" • ")
    } else if !ui.status_message.is_empty() {
        ui.status_message.clone()
    } else {
        String::new()
    };

    let status = Paragraph::new(Text::from(Line::from(Span::styled(
        text,
        Style::default().fg(Color::White),
    ))))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue))
            .title("Status"),
    );

    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let controls = Paragraph::new(Text::from(Line::from(vec![
        Span::styled(
            "↑/↓ ",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Navigate • ", Style::default().fg(Color::White)),
        Span::styled(
            "ENTER ",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Play/Stop • ", Style::default().fg(Color::White)),
        Span::styled(
            "R ",
            Style::default()
                .fg(Color::Blue)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("Refresh • ", Style::default().fg(Color::White)),
        Span::styled(
            "Q ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::styled("Quit", Style::default().fg(Color::White)),
    ])))
    .alignment(Alignment::Center)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Gray))
            .title("Controls"),
    );

    f.render_widget(controls, area);
}

/// Char-aware truncation with an ellipsis, padded to `max_len`.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return format!("{:<max_len$}", s);
    }
    let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
    format!("{:<max_len$}", format!("{kept}…"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_pads_short_strings() {
        assert_eq!(truncate("abc", 5), "abc  ");
    }

    #[test]
    fn truncate_shortens_long_strings() {
        let truncated = truncate("a very long stream title", 10);
        assert_eq!(truncated.chars().count(), 10);
        assert!(truncated.ends_with('…'));
    }
}
