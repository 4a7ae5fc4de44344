use crate::{
    app::{AppController, PlayIcon, VolumeIcon},
    audio::Playback,
    metadata::NowPlaying,
    theme::{Palette, Theme},
};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};
use std::collections::VecDeque;

// Layout constants for better maintainability
const HEADER_HEIGHT: u16 = 3;
const NOW_PLAYING_HEIGHT: u16 = 4;
const CONTROLS_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
const CHAT_EXPANDED_HEIGHT: u16 = 9;
const CHAT_COLLAPSED_HEIGHT: u16 = 1;
const MARGIN: u16 = 1;
const VOLUME_BAR_WIDTH: usize = 10;
const HISTORY_LEN: usize = 10;

pub struct UiState {
    pub now_playing: NowPlaying,
    pub listeners: Option<u32>,
    pub server_name: Option<String>,
    pub theme: Theme,
    pub play_icon: PlayIcon,
    pub volume_icon: VolumeIcon,
    pub chat_collapsed: bool,
    pub chat_url: Option<String>,
    /// Most recent raw titles, newest first.
    pub history: VecDeque<String>,
    /// Blocking message shown until dismissed.
    pub alert: Option<String>,
    pub should_quit: bool,
}

impl UiState {
    pub fn new(default_artist: &str, chat_url: Option<String>) -> Self {
        Self {
            now_playing: NowPlaying::new(default_artist, ""),
            listeners: None,
            server_name: None,
            theme: Theme::Day,
            play_icon: PlayIcon::Play,
            volume_icon: VolumeIcon::High,
            chat_collapsed: false,
            chat_url,
            history: VecDeque::with_capacity(HISTORY_LEN),
            alert: None,
            should_quit: false,
        }
    }

    /// Move `raw_title` to the front, keeping each title once.
    pub fn record_history(&mut self, raw_title: &str) {
        self.history.retain(|seen| seen != raw_title);
        self.history.push_front(raw_title.to_string());
        self.history.truncate(HISTORY_LEN);
    }

    fn chat_icon(&self) -> &'static str {
        if self.chat_collapsed {
            "▲"
        } else {
            "▼"
        }
    }
}

pub fn render_ui<P: Playback>(f: &mut Frame, app: &AppController<P>) {
    let ui = &app.ui_app;
    let palette = ui.theme.palette();

    let background =
        Block::default().style(Style::default().bg(palette.background).fg(palette.foreground));
    f.render_widget(background, f.area());

    let chat_height = if ui.chat_collapsed {
        CHAT_COLLAPSED_HEIGHT
    } else {
        CHAT_EXPANDED_HEIGHT
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Length(NOW_PLAYING_HEIGHT),
            Constraint::Min(6),                    // Visualizer
            Constraint::Length(CONTROLS_HEIGHT),
            Constraint::Length(chat_height),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(f.area());

    render_header(f, chunks[0], app, &palette);
    render_now_playing(f, chunks[1], ui, &palette);
    render_visualizer(f, chunks[2], app, &palette);
    render_controls(f, chunks[3], app, &palette);
    render_chat(f, chunks[4], ui, &palette);
    render_footer(f, chunks[5], &palette);

    if let Some(message) = &ui.alert {
        render_alert(f, message, &palette);
    }
}

fn bordered<'a>(title: &'a str, palette: &Palette) -> Block<'a> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.border))
        .title(title)
}

fn render_header<P: Playback>(
    f: &mut Frame,
    area: Rect,
    app: &AppController<P>,
    palette: &Palette,
) {
    let ui = &app.ui_app;
    let status = if app.state.is_playing { "EN VIVO" } else { "PAUSADO" };

    let mut spans = vec![
        Span::styled(
            "MUFIQUE RADIO",
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD),
        ),
        Span::styled(" • ", Style::default().fg(palette.muted)),
        Span::styled(status, Style::default().add_modifier(Modifier::BOLD)),
    ];
    if let Some(name) = &ui.server_name {
        spans.push(Span::styled(" • ", Style::default().fg(palette.muted)));
        spans.push(Span::raw(name.as_str()));
    }
    if let Some(listeners) = ui.listeners {
        spans.push(Span::styled(" • ", Style::default().fg(palette.muted)));
        spans.push(Span::styled(
            format!("{} listeners", listeners),
            Style::default().fg(palette.accent),
        ));
    }
    if ui.theme == Theme::Night {
        spans.push(Span::styled(" ☾", Style::default().fg(palette.muted)));
    }

    let header = Paragraph::new(Line::from(spans)).block(bordered("Mufique Radio", palette));
    f.render_widget(header, area);
}

fn render_now_playing(f: &mut Frame, area: Rect, ui: &UiState, palette: &Palette) {
    let title = if ui.now_playing.title.is_empty() {
        "Loading track info...".to_string()
    } else {
        ui.now_playing.title.clone()
    };

    let content = vec![
        Line::from(Span::styled(
            title,
            Style::default().fg(palette.foreground).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            ui.now_playing.artist.as_str(),
            Style::default().fg(palette.muted),
        )),
    ];

    let now_playing = Paragraph::new(Text::from(content)).block(bordered("Now Playing", palette));
    f.render_widget(now_playing, area);
}

fn render_visualizer<P: Playback>(
    f: &mut Frame,
    area: Rect,
    app: &AppController<P>,
    palette: &Palette,
) {
    let block = bordered("Visualizer", palette);
    if app.visualizer.is_available() {
        f.render_widget(app.visualizer.widget(block), area);
    } else {
        f.render_widget(block, area);
    }
}

fn volume_bar(volume: f32) -> String {
    let filled = (volume.clamp(0.0, 1.0) * VOLUME_BAR_WIDTH as f32).round() as usize;
    format!(
        "{}{}",
        "━".repeat(filled),
        "─".repeat(VOLUME_BAR_WIDTH - filled)
    )
}

fn render_controls<P: Playback>(
    f: &mut Frame,
    area: Rect,
    app: &AppController<P>,
    palette: &Palette,
) {
    let ui = &app.ui_app;
    let volume = app.state.volume;

    let line = Line::from(vec![
        Span::styled(
            format!(" {} ", ui.play_icon.glyph()),
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD),
        ),
        Span::raw(ui.play_icon.label()),
        Span::styled("   │   ", Style::default().fg(palette.muted)),
        Span::raw(format!("{} ", ui.volume_icon.glyph())),
        Span::styled(volume_bar(volume), Style::default().fg(palette.accent)),
        Span::raw(format!(" {:>3}%", (volume * 100.0).round() as u32)),
    ]);

    let controls = Paragraph::new(line).block(bordered("Controls", palette));
    f.render_widget(controls, area);
}

fn render_chat(f: &mut Frame, area: Rect, ui: &UiState, palette: &Palette) {
    let title = format!(" Chat {} ", ui.chat_icon());
    let title_style = Style::default().fg(palette.accent).add_modifier(Modifier::BOLD);

    if ui.chat_collapsed {
        let bar = Paragraph::new(Line::from(Span::styled(title, title_style)));
        f.render_widget(bar, area);
        return;
    }

    let mut lines = vec![match &ui.chat_url {
        Some(url) => Line::from(vec![
            Span::raw("Join: "),
            Span::styled(url.as_str(), Style::default().add_modifier(Modifier::UNDERLINED)),
        ]),
        None => Line::from(Span::styled("No chat configured", Style::default().fg(palette.muted))),
    }];
    lines.extend(
        ui.history.iter().map(|raw| {
            Line::from(Span::styled(format!("♪ {}", raw), Style::default().fg(palette.muted)))
        }),
    );

    let chat = Paragraph::new(Text::from(lines))
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.border))
                .title(Span::styled(title, title_style)),
        );
    f.render_widget(chat, area);
}

fn render_footer(f: &mut Frame, area: Rect, palette: &Palette) {
    let key = |k: &'static str| {
        Span::styled(k, Style::default().fg(palette.accent).add_modifier(Modifier::BOLD))
    };
    let text = |t: &'static str| Span::styled(t, Style::default().fg(palette.foreground));

    let controls = Paragraph::new(Line::from(vec![
        key("SPACE "),
        text("Play/Pause • "),
        key("+/- "),
        text("Volume • "),
        key("M "),
        text("Mute • "),
        key("C "),
        text("Chat • "),
        key("Q "),
        text("Quit"),
    ]))
    .alignment(Alignment::Center)
    .block(bordered("Keys", palette));

    f.render_widget(controls, area);
}

fn render_alert(f: &mut Frame, message: &str, palette: &Palette) {
    let area = centered_rect(f.area(), 50, 5);
    let alert = Paragraph::new(Text::from(vec![
        Line::from(message),
        Line::from(Span::styled("[Enter] OK", Style::default().fg(palette.muted))),
    ]))
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .style(Style::default().bg(palette.background).fg(palette.foreground))
    .block(bordered("Aviso", palette));

    f.render_widget(Clear, area);
    f.render_widget(alert, area);
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
