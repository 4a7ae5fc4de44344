//! Audio analysis graph: a tap on the played samples feeding an FFT
//! analyser that reports byte-scaled frequency magnitudes.
use anyhow::Result;
use rodio::Source;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

/// Shared ring of the most recently played mono samples.
#[derive(Clone)]
pub struct SampleTap {
    ring: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
    running: Arc<AtomicBool>,
}

impl SampleTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn push(&self, sample: f32) {
        // Never block the output thread; a dropped sample only costs one frame of accuracy
        if let Ok(mut ring) = self.ring.try_lock() {
            if ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(sample);
        }
    }

    /// Copy the newest samples into `out`, zero-filling the front when fewer
    /// are available.
    pub fn latest(&self, out: &mut [f32]) {
        out.fill(0.0);
        if let Ok(ring) = self.ring.lock() {
            let n = ring.len().min(out.len());
            let offset = out.len() - n;
            for (dst, src) in out[offset..].iter_mut().zip(ring.iter().skip(ring.len() - n)) {
                *dst = *src;
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }

    pub fn wrap<S: Source<Item = f32>>(&self, source: S) -> AnalyserTap<S> {
        AnalyserTap::new(source, self.clone())
    }
}

/// Pass-through rodio source that mixes every frame down to mono and
/// hands it to the tap while the graph is running.
pub struct AnalyserTap<S> {
    inner: S,
    tap: SampleTap,
    frame_sum: f32,
    frame_pos: u16,
}

impl<S: Source<Item = f32>> AnalyserTap<S> {
    fn new(inner: S, tap: SampleTap) -> Self {
        Self {
            inner,
            tap,
            frame_sum: 0.0,
            frame_pos: 0,
        }
    }
}

impl<S: Source<Item = f32>> Iterator for AnalyserTap<S> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next()?;

        if self.tap.is_running() {
            let channels = self.inner.channels().max(1);
            self.frame_sum += sample;
            self.frame_pos += 1;
            if self.frame_pos >= channels {
                self.tap.push(self.frame_sum / channels as f32);
                self.frame_sum = 0.0;
                self.frame_pos = 0;
            }
        }

        Some(sample)
    }
}

impl<S: Source<Item = f32>> Source for AnalyserTap<S> {
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

/// Real-time frequency analysis with the conventions of a browser
/// `AnalyserNode`: Blackman window, 1/N magnitude, exponential smoothing
/// across frames and decibel-to-byte scaling.
pub struct Analyser {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Analyser {
    pub fn new(fft_size: usize) -> Result<Self> {
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            anyhow::bail!(
                "FFT size must be a power of two between {} and {}, got {}",
                MIN_FFT_SIZE,
                MAX_FFT_SIZE,
                fft_size
            );
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Ok(Self {
            fft_size,
            fft,
            window: blackman(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        })
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the last `fft_size` time-domain samples and write one byte
    /// per bin into `out` (extra entries in `out` are left untouched).
    pub fn byte_frequency_data(&mut self, samples: &[f32], out: &mut [u8]) {
        let n = self.fft_size;
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let tau = self.smoothing.clamp(0.0, 1.0);
        let range = self.max_db - self.min_db;
        for (k, byte) in out.iter_mut().take(self.smoothed.len()).enumerate() {
            let magnitude = self.buffer[k].norm() / n as f32;
            let smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            *byte = if self.smoothed[k] <= 0.0 {
                0
            } else {
                let db = 20.0 * self.smoothed[k].log10();
                let scaled = 255.0 / range * (db - self.min_db);
                scaled.clamp(0.0, 255.0) as u8
            };
        }
    }
}

fn blackman(n: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let two_pi = 2.0 * std::f32::consts::PI;
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (two_pi * x).cos() + a2 * (2.0 * two_pi * x).cos()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Suspended,
    Running,
}

/// source → analyser tap → output. Starts suspended; nothing is captured
/// until [`AudioGraph::resume`].
pub struct AudioGraph {
    tap: SampleTap,
    analyser: Analyser,
    state: GraphState,
    window: Vec<f32>,
}

impl AudioGraph {
    pub fn new(fft_size: usize) -> Result<Self> {
        let analyser = Analyser::new(fft_size)?;
        Ok(Self {
            tap: SampleTap::new(fft_size),
            analyser,
            state: GraphState::Suspended,
            window: vec![0.0; fft_size],
        })
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn resume(&mut self) {
        self.state = GraphState::Running;
        self.tap.set_running(true);
    }

    pub fn suspend(&mut self) {
        self.state = GraphState::Suspended;
        self.tap.set_running(false);
    }

    pub fn tap(&self) -> SampleTap {
        self.tap.clone()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.analyser.frequency_bin_count()
    }

    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        self.tap.latest(&mut self.window);
        self.analyser.byte_frequency_data(&self.window, out);
    }
}
