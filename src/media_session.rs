//! Now-playing information for the host's media surface and the media-key
//! handlers that go with it.
use anyhow::Result;
use crossterm::event::{KeyCode, MediaKeyCode};
use log::debug;

use crate::metadata::NowPlaying;

pub const ALBUM: &str = "Mufique Radio";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    pub src: &'static str,
    pub sizes: &'static str,
    pub mime: &'static str,
}

pub const ARTWORK: [Artwork; 2] = [
    Artwork {
        src: "assets/icons/icon-192x192.png",
        sizes: "192x192",
        mime: "image/png",
    },
    Artwork {
        src: "assets/icons/icon-512x512.png",
        sizes: "512x512",
        mime: "image/png",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub artwork: Vec<Artwork>,
}

impl MediaMetadata {
    pub fn from_now_playing(now_playing: &NowPlaying) -> Self {
        Self {
            title: now_playing.title.clone(),
            artist: now_playing.artist.clone(),
            album: ALBUM.to_string(),
            artwork: ARTWORK.to_vec(),
        }
    }

    pub fn display_line(&self) -> String {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (true, true) => self.album.clone(),
            (true, false) => format!("{} · {}", self.title, self.album),
            (false, true) => format!("{} · {}", self.artist, self.album),
            (false, false) => format!("{} - {} · {}", self.artist, self.title, self.album),
        }
    }
}

/// Where now-playing metadata is published.
pub trait NowPlayingSurface {
    fn publish(&mut self, metadata: &MediaMetadata) -> Result<()>;
}

/// Publishes to the terminal window title.
pub struct TerminalTitle;

impl NowPlayingSurface for TerminalTitle {
    fn publish(&mut self, metadata: &MediaMetadata) -> Result<()> {
        crossterm::execute!(
            std::io::stdout(),
            crossterm::terminal::SetTitle(metadata.display_line())
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAction {
    Play,
    Pause,
    Toggle,
}

pub struct MediaSession {
    enabled: bool,
    surface: Box<dyn NowPlayingSurface>,
    current: Option<MediaMetadata>,
}

impl MediaSession {
    pub fn new(enabled: bool, surface: Box<dyn NowPlayingSurface>) -> Self {
        Self {
            enabled,
            surface,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&MediaMetadata> {
        self.current.as_ref()
    }

    /// Publish `now_playing` if the session is enabled and it changed.
    pub fn update(&mut self, now_playing: &NowPlaying) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let metadata = MediaMetadata::from_now_playing(now_playing);
        if self.current.as_ref() == Some(&metadata) {
            return Ok(());
        }
        debug!("Media session now playing: {}", metadata.display_line());
        self.surface.publish(&metadata)?;
        self.current = Some(metadata);
        Ok(())
    }

    /// Map a media key to its action. Keys are ignored while disabled.
    pub fn action_for(&self, key: KeyCode) -> Option<MediaAction> {
        if !self.enabled {
            return None;
        }
        match key {
            KeyCode::Media(MediaKeyCode::Play) => Some(MediaAction::Play),
            KeyCode::Media(MediaKeyCode::Pause) => Some(MediaAction::Pause),
            KeyCode::Media(MediaKeyCode::PlayPause) => Some(MediaAction::Toggle),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every publish for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSurface {
        pub published: Rc<RefCell<Vec<MediaMetadata>>>,
    }

    impl NowPlayingSurface for RecordingSurface {
        fn publish(&mut self, metadata: &MediaMetadata) -> Result<()> {
            self.published.borrow_mut().push(metadata.clone());
            Ok(())
        }
    }

    #[test]
    fn test_update_publishes_changes_only() {
        let surface = RecordingSurface::default();
        let mut session = MediaSession::new(true, Box::new(surface.clone()));

        session.update(&NowPlaying::new("Artist", "Title")).unwrap();
        session.update(&NowPlaying::new("Artist", "Title")).unwrap();
        session.update(&NowPlaying::new("Artist", "Other")).unwrap();

        let published = surface.published.borrow();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].album, "Mufique Radio");
        assert_eq!(published[0].artwork.len(), 2);
        assert_eq!(published[1].title, "Other");
    }

    #[test]
    fn test_disabled_session_is_inert() {
        let surface = RecordingSurface::default();
        let mut session = MediaSession::new(false, Box::new(surface.clone()));

        session.update(&NowPlaying::new("Artist", "Title")).unwrap();
        assert!(surface.published.borrow().is_empty());
        assert!(session.current().is_none());
        assert_eq!(session.action_for(KeyCode::Media(MediaKeyCode::Play)), None);
    }

    #[test]
    fn test_media_keys() {
        let session = MediaSession::new(true, Box::new(RecordingSurface::default()));
        assert_eq!(
            session.action_for(KeyCode::Media(MediaKeyCode::Pause)),
            Some(MediaAction::Pause)
        );
        assert_eq!(
            session.action_for(KeyCode::Media(MediaKeyCode::PlayPause)),
            Some(MediaAction::Toggle)
        );
        assert_eq!(session.action_for(KeyCode::Char(' ')), None);
    }

    #[test]
    fn test_display_line() {
        let metadata = MediaMetadata::from_now_playing(&NowPlaying::new("A", "B"));
        assert_eq!(metadata.display_line(), "A - B · Mufique Radio");
    }
}
