use anyhow::Result;
use crossterm::event::KeyCode;
use log::{debug, error, info, warn};

use crate::{
    actions::Response,
    analyser::GraphState,
    audio::Playback,
    config::Config,
    media_session::{MediaAction, MediaSession},
    metadata::{process_metadata, SourceStatus},
    theme::ThemeSwitcher,
    ui::UiState,
    visualizer::Visualizer,
};

const VOLUME_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayIcon {
    Play,
    Pause,
}

impl PlayIcon {
    pub fn glyph(self) -> &'static str {
        match self {
            PlayIcon::Play => "▶",
            PlayIcon::Pause => "⏸",
        }
    }

    /// Accessible label for the control.
    pub fn label(self) -> &'static str {
        match self {
            PlayIcon::Play => "Reproducir",
            PlayIcon::Pause => "Pausar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeIcon {
    Muted,
    Low,
    High,
}

impl VolumeIcon {
    pub fn from_level(level: f32) -> Self {
        if level <= 0.0 {
            VolumeIcon::Muted
        } else if level < 0.5 {
            VolumeIcon::Low
        } else {
            VolumeIcon::High
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            VolumeIcon::Muted => "🔇",
            VolumeIcon::Low => "🔉",
            VolumeIcon::High => "🔊",
        }
    }
}

/// Playback state owned by the controller.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub is_playing: bool,
    pub stream_url: String,
    pub volume: f32,
}

pub struct AppController<P: Playback> {
    pub ui_app: UiState,
    pub state: PlayerState,
    pub visualizer: Visualizer,
    player: P,
    media_session: MediaSession,
    theme: ThemeSwitcher,
    tap_attached: bool,
    /// Level to restore when unmuting.
    unmuted_volume: f32,
    default_artist: String,
    alert_message: String,
}

impl<P: Playback> AppController<P> {
    pub fn new(player: P, config: &Config, media_session: MediaSession) -> Self {
        let mut controller = Self {
            ui_app: UiState::new(&config.default_artist, config.chat_url.clone()),
            state: PlayerState {
                is_playing: false,
                stream_url: config.stream_url.clone(),
                volume: 1.0,
            },
            visualizer: Visualizer::new(config.visualizer.clone()),
            player,
            media_session,
            theme: ThemeSwitcher::new(),
            tap_attached: false,
            unmuted_volume: 1.0,
            default_artist: config.default_artist.clone(),
            alert_message: config.alert_message.clone(),
        };
        controller.set_volume(config.initial_volume);
        controller
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    /// Pause when playing. Otherwise build the analysis graph on first use,
    /// wake it, and reopen the stream from scratch so playback starts at the
    /// live edge.
    pub async fn toggle_play(&mut self) -> Result<()> {
        if self.state.is_playing {
            if let Err(e) = self.player.pause() {
                warn!("Pause failed: {}", e);
            }
            self.state.is_playing = false;
            self.ui_app.play_icon = PlayIcon::Play;
            // Stale samples would flash on the next resume
            if let Some(graph) = self.visualizer.graph_mut() {
                graph.suspend();
                graph.tap().clear();
            }
            return Ok(());
        }

        if let Some(graph) = self.visualizer.initialize() {
            if graph.state() == GraphState::Suspended {
                graph.resume();
            }
            if !self.tap_attached {
                self.player.attach_tap(graph.tap());
                self.tap_attached = true;
            }
        }

        let url = self.state.stream_url.clone();
        match self.player.play(&url).await {
            Ok(()) => {
                info!("Playback started: {}", url);
                self.state.is_playing = true;
                self.ui_app.play_icon = PlayIcon::Pause;
                self.update_media_session();
            }
            Err(e) => {
                error!("Error playing audio: {}", e);
                self.ui_app.alert = Some(self.alert_message.clone());
            }
        }
        Ok(())
    }

    pub fn set_volume(&mut self, value: f32) {
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        self.state.volume = value;
        self.player.set_volume(value);
        self.ui_app.volume_icon = VolumeIcon::from_level(value);
        if value > 0.0 {
            self.unmuted_volume = value;
        }
    }

    fn nudge_volume(&mut self, delta: f32) {
        // Round to the slider's step so repeated nudges land on 0.0 and 1.0 exactly
        let next = ((self.state.volume + delta) / VOLUME_STEP).round() * VOLUME_STEP;
        self.set_volume(next);
    }

    fn toggle_mute(&mut self) {
        if self.state.volume > 0.0 {
            let restore = self.state.volume;
            self.set_volume(0.0);
            self.unmuted_volume = restore;
        } else {
            self.set_volume(self.unmuted_volume);
        }
    }

    pub fn toggle_chat(&mut self) {
        self.ui_app.chat_collapsed = !self.ui_app.chat_collapsed;
    }

    pub async fn handle_key_event(&mut self, key_code: KeyCode) -> Result<bool> {
        // The alert blocks everything until dismissed
        if self.ui_app.alert.is_some() {
            if matches!(key_code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.ui_app.alert = None;
            }
            return Ok(false);
        }

        if let Some(action) = self.media_session.action_for(key_code) {
            let toggle = match action {
                MediaAction::Play => !self.state.is_playing,
                MediaAction::Pause => self.state.is_playing,
                MediaAction::Toggle => true,
            };
            if toggle {
                self.toggle_play().await?;
            }
            return Ok(false);
        }

        match key_code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('Q') => {
                self.quit();
                return Ok(true);
            }
            KeyCode::Char(' ') | KeyCode::Enter => {
                self.toggle_play().await?;
            }
            KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up | KeyCode::Right => {
                self.nudge_volume(VOLUME_STEP);
            }
            KeyCode::Char('-') | KeyCode::Down | KeyCode::Left => {
                self.nudge_volume(-VOLUME_STEP);
            }
            KeyCode::Char('m') | KeyCode::Char('M') => {
                self.toggle_mute();
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                self.toggle_chat();
            }
            _ => {}
        }
        Ok(false)
    }

    /// Per-frame housekeeping: notice a session that died after connecting,
    /// then advance the visualizer.
    pub fn on_frame(&mut self) {
        if self.state.is_playing {
            if let Some(message) = self.player.session_error() {
                error!("Error playing audio: {}", message);
                self.state.is_playing = false;
                self.ui_app.play_icon = PlayIcon::Play;
                self.ui_app.alert = Some(self.alert_message.clone());
            }
        }
        self.visualizer.tick(self.state.is_playing);
    }

    pub fn process_response(&mut self, resp: Response) {
        match resp {
            Response::Metadata(Ok(Some(source))) => self.apply_status(source),
            Response::Metadata(Ok(None)) => {
                debug!("Status document has no source");
            }
            Response::Metadata(Err(e)) => {
                // Keep showing the last known track
                debug!("Metadata fetch error: {:#}", e);
            }
            Response::Clock { hour } => {
                if self.theme.apply(hour) {
                    self.ui_app.theme = self.theme.current();
                }
            }
            Response::CacheRegistered(Ok(name)) => {
                info!("Offline cache registered: {}", name);
            }
            Response::CacheRegistered(Err(e)) => {
                warn!("Offline cache registration failed: {:#}", e);
            }
        }
    }

    fn apply_status(&mut self, source: SourceStatus) {
        if source.listeners.is_some() {
            self.ui_app.listeners = source.listeners;
        }
        if source.server_name.is_some() {
            self.ui_app.server_name = source.server_name;
        }

        // Icecast sends "" between tracks
        let Some(raw_title) = source.title.filter(|t| !t.is_empty()) else {
            return;
        };
        let now_playing = process_metadata(&raw_title, &self.default_artist);
        if now_playing != self.ui_app.now_playing {
            debug!("Now playing: {} - {}", now_playing.artist, now_playing.title);
            self.ui_app.record_history(&raw_title);
            self.ui_app.now_playing = now_playing;
            if self.state.is_playing {
                self.update_media_session();
            }
        }
    }

    fn update_media_session(&mut self) {
        if let Err(e) = self.media_session.update(&self.ui_app.now_playing) {
            warn!("Media session update failed: {}", e);
        }
    }

    pub fn quit(&mut self) {
        if self.state.is_playing {
            let _ = self.player.pause();
            self.state.is_playing = false;
        }
        self.ui_app.should_quit = true;
    }

    pub fn should_quit(&self) -> bool {
        self.ui_app.should_quit
    }
}
