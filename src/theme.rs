use chrono::Timelike;
use log::debug;
use ratatui::style::Color;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::Response;

const NIGHT_STARTS: u32 = 18;
const NIGHT_ENDS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Day,
    Night,
}

impl Theme {
    pub fn for_hour(hour: u32) -> Self {
        if is_night(hour) {
            Theme::Night
        } else {
            Theme::Day
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Day => Palette {
                background: Color::Rgb(0xf4, 0xf1, 0xea),
                foreground: Color::Rgb(0x1e, 0x27, 0x2e),
                accent: Color::Rgb(0x2e, 0xcc, 0x71),
                muted: Color::Rgb(0x7f, 0x8c, 0x8d),
                border: Color::Rgb(0x27, 0xae, 0x60),
            },
            Theme::Night => Palette {
                background: Color::Rgb(0x0b, 0x13, 0x1a),
                foreground: Color::Rgb(0xec, 0xf0, 0xf1),
                accent: Color::Rgb(0x2e, 0xcc, 0x71),
                muted: Color::Rgb(0x5d, 0x6d, 0x7e),
                border: Color::Rgb(0x1a, 0x5c, 0x3a),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub background: Color,
    pub foreground: Color,
    pub accent: Color,
    pub muted: Color,
    pub border: Color,
}

/// 18:00 to 05:59 local time.
pub fn is_night(hour: u32) -> bool {
    hour >= NIGHT_STARTS || hour < NIGHT_ENDS
}

pub fn local_hour() -> u32 {
    chrono::Local::now().hour()
}

#[derive(Debug, Default)]
pub struct ThemeSwitcher {
    current: Option<Theme>,
}

impl ThemeSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Theme {
        self.current.unwrap_or(Theme::Day)
    }

    /// Recompute the theme for `hour`. Returns true when it changed.
    pub fn apply(&mut self, hour: u32) -> bool {
        let next = Theme::for_hour(hour);
        if self.current == Some(next) {
            return false;
        }
        debug!("Theme switching to {:?} at hour {}", next, hour);
        self.current = Some(next);
        true
    }
}

/// Reports the local hour on a fixed interval, starting immediately.
pub fn spawn_ticker(
    interval: Duration,
    tx: mpsc::Sender<Response>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.send(Response::Clock { hour: local_hour() }).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_night_hours() {
        for hour in 0..24 {
            let expected = hour >= 18 || hour < 6;
            assert_eq!(is_night(hour), expected, "hour {}", hour);
        }
        assert!(!is_night(6));
        assert!(!is_night(17));
        assert!(is_night(18));
        assert!(is_night(5));
    }

    #[test]
    fn test_boundary_flips_exactly_once() {
        let mut switcher = ThemeSwitcher::new();
        assert!(switcher.apply(17));
        assert_eq!(switcher.current(), Theme::Day);

        assert!(switcher.apply(18));
        assert_eq!(switcher.current(), Theme::Night);

        assert!(!switcher.apply(18));
        assert!(!switcher.apply(23));
        assert!(!switcher.apply(0));
        assert_eq!(switcher.current(), Theme::Night);

        assert!(switcher.apply(6));
        assert_eq!(switcher.current(), Theme::Day);
    }

    #[tokio::test]
    async fn test_ticker_reports_immediately() {
        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let handle = spawn_ticker(Duration::from_secs(3600), tx, token.clone());

        match rx.recv().await {
            Some(Response::Clock { hour }) => assert!(hour < 24),
            other => panic!("unexpected response: {:?}", other),
        }

        token.cancel();
        handle.await.unwrap();
    }
}
