use anyhow::Result;
use futures_util::stream::StreamExt;
use log::{debug, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tokio_util::sync::CancellationToken;

use crate::analyser::SampleTap;

const MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;
const BACKPRESSURE_THRESHOLD: usize = 6 * 1024 * 1024;
const CLEANUP_THRESHOLD: usize = 2 * 1024 * 1024;
const PREBUFFER_BYTES: usize = 64 * 1024;
/// Decoded chunks allowed to queue in the sink before the decoder waits.
const MAX_QUEUED_CHUNKS: usize = 32;

/// Network bytes waiting to be read by the decoder.
#[derive(Default)]
struct StreamBuffer {
    data: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl StreamBuffer {
    fn unread(&self) -> usize {
        self.data.len() - self.pos
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.data.drain(..self.pos);
            self.pos = 0;
        }
    }
}

/// Blocking reader over the network buffer so Symphonia can pull bytes as
/// they arrive. Only ever read from the blocking decode thread.
struct StreamingSource {
    buffer: Arc<Mutex<StreamBuffer>>,
    cancel: CancellationToken,
}

impl Read for StreamingSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            {
                let mut stream = self.buffer.lock().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::Other, "stream buffer poisoned")
                })?;

                if stream.unread() > 0 {
                    let n = buf.len().min(stream.unread());
                    let start = stream.pos;
                    buf[..n].copy_from_slice(&stream.data[start..start + n]);
                    stream.pos += n;
                    return Ok(n);
                }

                if stream.finished || self.cancel.is_cancelled() {
                    return Ok(0);
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Seek for StreamingSource {
    fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "seek not supported"))
    }
}

impl MediaSource for StreamingSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Stopped,
    Connecting,
    Playing,
    Paused,
    Error(String),
}

struct PlayerState {
    current_url: Option<String>,
    playback_state: PlaybackState,
    sink: Option<Arc<Sink>>,
    cancellation_token: Option<CancellationToken>,
    volume: f32,
    tap: Option<SampleTap>,
}

impl std::fmt::Debug for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerState")
            .field("current_url", &self.current_url)
            .field("playback_state", &self.playback_state)
            .field("sink", &self.sink.as_ref().map(|_| "Some(Sink)"))
            .field("volume", &self.volume)
            .field("tap", &self.tap.is_some())
            .finish()
    }
}

impl PlayerState {
    fn new() -> Self {
        Self {
            current_url: None,
            playback_state: PlaybackState::Stopped,
            sink: None,
            cancellation_token: None,
            volume: 1.0,
            tap: None,
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        debug!("Player state changing from {:?} to {:?}", self.playback_state, state);
        self.playback_state = state;
    }

    /// Cancel the running session and drop its sink.
    fn end_session(&mut self) {
        if let Some(token) = self.cancellation_token.take() {
            token.cancel();
        }
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

fn lock_state(state: &Mutex<PlayerState>) -> Result<std::sync::MutexGuard<'_, PlayerState>> {
    state
        .lock()
        .map_err(|_| anyhow::anyhow!("Failed to acquire state lock"))
}

/// What the playback controller needs from an audio output.
#[allow(async_fn_in_trait)]
pub trait Playback {
    /// Open `url` from scratch and start playing it. Resolves once the
    /// stream has connected.
    async fn play(&mut self, url: &str) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn set_volume(&mut self, volume: f32);
    /// Route every decoded sample through `tap` from the next session on.
    fn attach_tap(&mut self, tap: SampleTap);
    /// Failure of the current session after it connected, if any.
    fn session_error(&self) -> Option<String>;
}

pub struct StreamPlayer {
    state: Arc<Mutex<PlayerState>>,
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    client: reqwest::Client,
}

impl StreamPlayer {
    pub fn new() -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()?;

        // No overall timeout: the body of a live stream never ends
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            state: Arc::new(Mutex::new(PlayerState::new())),
            _stream: stream,
            stream_handle,
            client,
        })
    }

    pub fn playback_state(&self) -> PlaybackState {
        match lock_state(&self.state) {
            Ok(state) => state.playback_state.clone(),
            Err(e) => PlaybackState::Error(e.to_string()),
        }
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.end_session();
        state.current_url = None;
        state.set_state(PlaybackState::Stopped);
        debug!("Audio stopped");
        Ok(())
    }

    /// Feed network bytes into the shared buffer until the body ends or the
    /// session is cancelled.
    async fn fill_buffer(
        response: reqwest::Response,
        buffer: Arc<Mutex<StreamBuffer>>,
        cancel: CancellationToken,
    ) {
        let mut stream = response.bytes_stream();
        let mut total_bytes = 0usize;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Network fetch cancelled");
                    break;
                }
                chunk = stream.next() => chunk,
            };

            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!("Stream read failed: {}", e);
                    break;
                }
                None => break,
            };
            total_bytes += chunk.len();

            loop {
                let unread = {
                    let Ok(mut buf) = buffer.lock() else { return };
                    if buf.pos > CLEANUP_THRESHOLD {
                        buf.compact();
                    }
                    if buf.data.len() > MAX_BUFFER_SIZE {
                        let drop_size = buf.data.len() / 4;
                        buf.data.drain(..drop_size);
                        buf.pos = buf.pos.saturating_sub(drop_size);
                        debug!("Emergency cleanup: dropped {}KB of old data", drop_size / 1024);
                    }
                    buf.unread()
                };

                if unread <= BACKPRESSURE_THRESHOLD {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(10)) => {},
                    _ = cancel.cancelled() => return,
                }
            }

            if let Ok(mut buf) = buffer.lock() {
                buf.data.extend_from_slice(&chunk);
            }
        }

        if let Ok(mut buf) = buffer.lock() {
            buf.finished = true;
        }
        debug!("Network stream ended, total bytes: {}KB", total_bytes / 1024);
    }

    /// Probe the container, then decode packets into the sink until the
    /// stream ends or the session is cancelled.
    fn decode_blocking_task(
        source: StreamingSource,
        sink: Arc<Sink>,
        tap: Option<SampleTap>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mss = MediaSourceStream::new(
            Box::new(source) as Box<dyn MediaSource>,
            MediaSourceStreamOptions::default(),
        );

        let probed = get_probe().format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format: Box<dyn FormatReader> = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow::anyhow!("no default track"))?;
        let track_id = track.id;
        let mut decoder: Box<dyn Decoder> =
            get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        debug!(
            "Found audio track: codec={:?}, sample_rate={:?}, channels={:?}",
            track.codec_params.codec, track.codec_params.sample_rate, track.codec_params.channels
        );

        loop {
            if cancel.is_cancelled() {
                debug!("Decode task cancelled");
                return Ok(());
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(symphonia::core::errors::Error::ResetRequired) => {
                    anyhow::bail!("decoder reset required");
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Non-fatal, skip bad frame
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            let chunk = SamplesBuffer::new(
                spec.channels.count() as u16,
                spec.rate,
                samples.samples().to_vec(),
            );
            match &tap {
                Some(tap) => sink.append(tap.wrap(chunk)),
                None => sink.append(chunk),
            }

            while sink.len() > MAX_QUEUED_CHUNKS && !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(20));
            }
        }

        if cancel.is_cancelled() {
            return Ok(());
        }
        anyhow::bail!("stream ended")
    }
}

impl Playback for StreamPlayer {
    async fn play(&mut self, url: &str) -> Result<()> {
        debug!("Playing audio from URL: {}", url);

        let cancel = CancellationToken::new();
        {
            let mut state = lock_state(&self.state)?;
            state.end_session();
            state.current_url = Some(url.to_string());
            state.set_state(PlaybackState::Connecting);
            state.cancellation_token = Some(cancel.clone());
        }

        let response = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let message = format!("HTTP error: {}", response.status());
                lock_state(&self.state)?.set_state(PlaybackState::Error(message.clone()));
                anyhow::bail!(message);
            }
            Err(e) => {
                lock_state(&self.state)?.set_state(PlaybackState::Error(e.to_string()));
                return Err(e.into());
            }
        };

        let sink = Arc::new(Sink::try_new(&self.stream_handle)?);
        let tap = {
            let mut state = lock_state(&self.state)?;
            if cancel.is_cancelled() {
                anyhow::bail!("playback cancelled while connecting");
            }
            sink.set_volume(state.volume);
            state.sink = Some(sink.clone());
            state.set_state(PlaybackState::Playing);
            state.tap.clone()
        };

        let buffer = Arc::new(Mutex::new(StreamBuffer::default()));
        tokio::spawn(Self::fill_buffer(response, buffer.clone(), cancel.clone()));

        let state = self.state.clone();
        tokio::spawn(async move {
            // Give the prober enough bytes to recognise the container
            while !cancel.is_cancelled() {
                let ready = buffer
                    .lock()
                    .map(|b| b.unread() >= PREBUFFER_BYTES || b.finished)
                    .unwrap_or(true);
                if ready {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            let source = StreamingSource {
                buffer,
                cancel: cancel.clone(),
            };
            let decode_cancel = cancel.clone();
            let result = tokio::task::spawn_blocking(move || {
                Self::decode_blocking_task(source, sink, tap, decode_cancel)
            })
            .await;

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(format!("decode task panicked: {}", e)),
            };

            if let Some(message) = failure {
                warn!("Playback session failed: {}", message);
                if !cancel.is_cancelled() {
                    if let Ok(mut state) = state.lock() {
                        state.set_state(PlaybackState::Error(message));
                    }
                }
            }
        });

        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        // Resuming always reconnects, so there is no point buffering while paused
        state.end_session();
        state.set_state(PlaybackState::Paused);
        debug!("Audio paused");
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        if let Ok(mut state) = lock_state(&self.state) {
            state.volume = volume;
            if let Some(sink) = state.sink.as_ref() {
                sink.set_volume(volume);
            }
        }
    }

    fn attach_tap(&mut self, tap: SampleTap) {
        if let Ok(mut state) = lock_state(&self.state) {
            state.tap = Some(tap);
        }
    }

    fn session_error(&self) -> Option<String> {
        match self.playback_state() {
            PlaybackState::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_source_reads_then_reports_eof() {
        let buffer = Arc::new(Mutex::new(StreamBuffer {
            data: b"abcdef".to_vec(),
            pos: 0,
            finished: true,
        }));
        let mut source = StreamingSource {
            buffer: buffer.clone(),
            cancel: CancellationToken::new(),
        };

        let mut out = [0u8; 4];
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(source.read(&mut out).unwrap(), 2);
        assert_eq!(&out[..2], b"ef");
        assert_eq!(source.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_streaming_source_stops_waiting_on_cancel() {
        let cancel = CancellationToken::new();
        let mut source = StreamingSource {
            buffer: Arc::new(Mutex::new(StreamBuffer::default())),
            cancel: cancel.clone(),
        };
        cancel.cancel();
        let mut out = [0u8; 4];
        assert_eq!(source.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_compact_drops_consumed_bytes() {
        let mut buffer = StreamBuffer {
            data: vec![1, 2, 3, 4, 5],
            pos: 3,
            finished: false,
        };
        buffer.compact();
        assert_eq!(buffer.data, vec![4, 5]);
        assert_eq!(buffer.pos, 0);
        assert_eq!(buffer.unread(), 2);
    }
}
