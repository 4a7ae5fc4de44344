use log::{debug, warn};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    widgets::{Block, Widget},
};

use crate::analyser::AudioGraph;
use crate::config::{BarStyle, Sizing, VisualizerConfig};

/// Emerald bars (#2ecc71).
pub const BAR_COLOR: Color = Color::Rgb(0x2e, 0xcc, 0x71);

const EIGHTHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// The analysis graph is built lazily and at most once. A failed build is
/// remembered so it is never retried.
enum GraphSlot {
    Empty,
    Ready(AudioGraph),
    Failed,
}

pub struct Visualizer {
    slot: GraphSlot,
    config: VisualizerConfig,
    bins: Vec<u8>,
    running: bool,
}

impl Visualizer {
    pub fn new(config: VisualizerConfig) -> Self {
        Self {
            slot: GraphSlot::Empty,
            config,
            bins: Vec::new(),
            running: false,
        }
    }

    /// Build the analysis graph on first call; later calls return the same
    /// graph, or `None` if construction failed.
    pub fn initialize(&mut self) -> Option<&mut AudioGraph> {
        if let GraphSlot::Empty = self.slot {
            self.slot = match AudioGraph::new(self.config.fft_size) {
                Ok(graph) => {
                    debug!(
                        "Visualizer initialized with {} frequency bins",
                        graph.frequency_bin_count()
                    );
                    self.bins = vec![0; graph.frequency_bin_count()];
                    GraphSlot::Ready(graph)
                }
                Err(e) => {
                    warn!("Visualizer init failed: {}", e);
                    GraphSlot::Failed
                }
            };
        }
        self.graph_mut()
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(self.slot, GraphSlot::Empty)
    }

    pub fn is_available(&self) -> bool {
        matches!(self.slot, GraphSlot::Ready(_))
    }

    pub fn graph_mut(&mut self) -> Option<&mut AudioGraph> {
        match &mut self.slot {
            GraphSlot::Ready(graph) => Some(graph),
            _ => None,
        }
    }

    /// One step of the draw loop. Pulls fresh bins while playing; once
    /// playback stops the loop halts and the bars are cleared.
    pub fn tick(&mut self, is_playing: bool) {
        if !is_playing {
            if self.running {
                debug!("Visualizer loop stopped");
                self.running = false;
                self.bins.fill(0);
            }
            return;
        }

        if let GraphSlot::Ready(graph) = &mut self.slot {
            self.running = true;
            graph.byte_frequency_data(&mut self.bins);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn widget<'a>(&'a self, block: Block<'a>) -> SpectrumBars<'a> {
        SpectrumBars::new(&self.bins, self.config.sizing, self.config.style).block(block)
    }
}

/// One vertical bar per frequency bin, drawn bottom-up.
pub struct SpectrumBars<'a> {
    bins: &'a [u8],
    sizing: Sizing,
    style: BarStyle,
    color: Color,
    block: Option<Block<'a>>,
}

impl<'a> SpectrumBars<'a> {
    pub fn new(bins: &'a [u8], sizing: Sizing, style: BarStyle) -> Self {
        Self {
            bins,
            sizing,
            style,
            color: BAR_COLOR,
            block: None,
        }
    }

    pub fn block(mut self, block: Block<'a>) -> Self {
        self.block = Some(block);
        self
    }

    /// Horizontal extent of each bar in cells, as `(start, end)` pairs.
    /// Bars are 2.5x the even share of the width with a one-cell gap, so the
    /// upper bins run off the right edge.
    fn columns(&self, width: u16) -> Vec<(u16, u16)> {
        let width_f = width as f32;
        let bar_width = width_f / self.bins.len().max(1) as f32 * 2.5;
        let mut spans = Vec::new();
        let mut x = 0.0f32;

        for _ in self.bins {
            if x >= width_f {
                break;
            }
            let start = x.round() as u16;
            let end = ((x + bar_width).round() as u16).max(start + 1).min(width);
            if start < end {
                spans.push((start, end));
            }
            x += bar_width + 1.0;
        }
        spans
    }
}

impl Widget for SpectrumBars<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let inner = match &self.block {
            Some(block) => {
                let inner = block.inner(area);
                block.clone().render(area, buf);
                inner
            }
            None => area,
        };

        if inner.width == 0 || inner.height == 0 || self.bins.is_empty() {
            return;
        }

        let rows = inner.height as usize;
        let units_per_row = match self.sizing {
            Sizing::Scaled => 8,
            Sizing::Raw => 1,
        };
        let total_units = rows * units_per_row;

        let mut bar_style = Style::default().fg(self.color);
        if self.style == BarStyle::Glow {
            bar_style = bar_style.add_modifier(Modifier::BOLD);
        }
        let halo_style = Style::default().fg(self.color).add_modifier(Modifier::DIM);

        for ((start, end), &value) in self.columns(inner.width).into_iter().zip(self.bins) {
            let units = (value as usize * total_units + 127) / 255;
            let full_rows = units / units_per_row;
            let partial = units % units_per_row;

            for col in start..end {
                let x = inner.x + col;
                for row in 0..rows {
                    let y = inner.y + inner.height - 1 - row as u16;
                    let cell = &mut buf[(x, y)];
                    if row < full_rows {
                        cell.set_char('█').set_style(bar_style);
                    } else if row == full_rows && partial > 0 {
                        cell.set_char(EIGHTHS[partial]).set_style(bar_style);
                    } else if row == full_rows + usize::from(partial > 0)
                        && units > 0
                        && self.style == BarStyle::Glow
                    {
                        cell.set_char('░').set_style(halo_style);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fft_size: usize, sizing: Sizing, style: BarStyle) -> VisualizerConfig {
        VisualizerConfig {
            fft_size,
            sizing,
            style,
        }
    }

    #[test]
    fn test_initialize_once() {
        let mut viz = Visualizer::new(VisualizerConfig::default());
        assert!(!viz.is_initialized());

        viz.initialize().unwrap().resume();
        assert_eq!(viz.bins().len(), 128);

        // Re-entry hands back the same, already resumed graph
        let graph = viz.initialize().unwrap();
        assert_eq!(graph.state(), crate::analyser::GraphState::Running);
    }

    #[test]
    fn test_failed_initialization_is_silent_and_sticky() {
        let mut viz = Visualizer::new(config(100, Sizing::Raw, BarStyle::Flat));
        assert!(viz.initialize().is_none());
        assert!(viz.is_initialized());
        assert!(!viz.is_available());
        assert!(viz.initialize().is_none());

        viz.tick(true);
        assert!(!viz.is_running());
        assert!(viz.bins().is_empty());
    }

    #[test]
    fn test_loop_stops_when_playback_stops() {
        let mut viz = Visualizer::new(VisualizerConfig::default());
        viz.initialize().unwrap().resume();

        viz.tick(true);
        assert!(viz.is_running());

        viz.tick(false);
        assert!(!viz.is_running());
        assert!(viz.bins().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bar_columns_overflow_right_edge() {
        let bins = [0u8; 128];
        let bars = SpectrumBars::new(&bins, Sizing::Raw, BarStyle::Flat);
        let columns = bars.columns(128);
        // 2.5 cells per bar + 1 gap -> about 37 bars fit in 128 cells
        assert!(columns.len() < 128 && columns.len() > 30, "{}", columns.len());
        assert_eq!(columns[0].0, 0);
        assert!(columns.iter().all(|&(s, e)| s < e && e <= 128));
        assert!(columns.windows(2).all(|w| w[0].1 < w[1].0));
    }

    #[test]
    fn test_render_raw_bar_heights() {
        let bins = [255u8, 0, 128, 0];
        let area = Rect::new(0, 0, 10, 4);
        let mut buf = Buffer::empty(area);
        SpectrumBars::new(&bins, Sizing::Raw, BarStyle::Flat).render(area, &mut buf);

        // Bar width 6.25: first bar spans columns 0..6 at full height
        for y in 0..4 {
            assert_eq!(buf[(0u16, y)].symbol(), "█");
        }
        // Gap column stays empty
        assert_eq!(buf[(6u16, 3u16)].symbol(), " ");
    }

    #[test]
    fn test_render_scaled_uses_partial_blocks() {
        let bins = [64u8];
        let area = Rect::new(0, 0, 3, 2);
        let mut buf = Buffer::empty(area);
        SpectrumBars::new(&bins, Sizing::Scaled, BarStyle::Flat).render(area, &mut buf);

        // 64/255 of 16 eighths rounds to 4: half a cell on the bottom row
        assert_eq!(buf[(0u16, 1u16)].symbol(), "▄");
        assert_eq!(buf[(0u16, 0u16)].symbol(), " ");
    }

    #[test]
    fn test_render_glow_draws_halo() {
        let bins = [128u8];
        let area = Rect::new(0, 0, 2, 4);
        let mut buf = Buffer::empty(area);
        SpectrumBars::new(&bins, Sizing::Raw, BarStyle::Glow).render(area, &mut buf);

        assert_eq!(buf[(0u16, 3u16)].symbol(), "█");
        assert_eq!(buf[(0u16, 2u16)].symbol(), "█");
        assert_eq!(buf[(0u16, 1u16)].symbol(), "░");
        assert_eq!(buf[(0u16, 0u16)].symbol(), " ");
    }
}
