use anyhow::Result;
use log::debug;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::Response;

/// One mount point as reported by Icecast's `status-json.xsl`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceStatus {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_listeners")]
    pub listeners: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    icestats: Option<IceStats>,
}

#[derive(Debug, Deserialize)]
struct IceStats {
    #[serde(default, deserialize_with = "deserialize_source")]
    source: Option<SourceStatus>,
}

/// Icecast reports a single mount as an object and several as an array;
/// the first mount is the main stream.
fn deserialize_source<'de, D>(deserializer: D) -> Result<Option<SourceStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(SourceStatus),
        Many(Vec<SourceStatus>),
    }

    match Option::<OneOrMany>::deserialize(deserializer) {
        Ok(Some(OneOrMany::One(source))) => Ok(Some(source)),
        Ok(Some(OneOrMany::Many(sources))) => Ok(sources.into_iter().next()),
        Ok(None) => Ok(None),
        Err(_) => Ok(None),
    }
}

fn deserialize_listeners<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(u32),
    }

    match Option::<StringOrNumber>::deserialize(deserializer) {
        Ok(Some(StringOrNumber::String(s))) => Ok(s.trim().parse().ok()),
        Ok(Some(StringOrNumber::Number(n))) => Ok(Some(n)),
        _ => Ok(None),
    }
}

/// Extract the main mount from a raw status document.
pub fn parse_status(body: &str) -> Result<Option<SourceStatus>> {
    let doc: StatusDocument = serde_json::from_str(body)?;
    Ok(doc.icestats.and_then(|stats| stats.source))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub artist: String,
    pub title: String,
}

impl NowPlaying {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

/// Split an Icecast "Artist - Title" string. Titles without the separator
/// are credited to `default_artist`. Only the first two segments are used,
/// so "A - B - C" is artist "A" and title "B".
pub fn process_metadata(raw_title: &str, default_artist: &str) -> NowPlaying {
    let mut parts = raw_title.split(" - ");
    match (parts.next(), parts.next()) {
        (Some(artist), Some(title)) => NowPlaying::new(artist, title),
        _ => NowPlaying::new(default_artist, raw_title),
    }
}

/// Anything that can produce the current station status.
pub trait StatusSource: Send + Sync + 'static {
    fn fetch_status(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<SourceStatus>>> + Send;
}

pub struct IcecastClient {
    client: reqwest::Client,
    status_url: String,
}

impl IcecastClient {
    pub fn new(status_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            status_url: status_url.into(),
        }
    }
}

impl StatusSource for IcecastClient {
    async fn fetch_status(&self) -> Result<Option<SourceStatus>> {
        // Timestamp query defeats intermediate caches
        let stamp = chrono::Utc::now().timestamp_millis();
        let response = self
            .client
            .get(&self.status_url)
            .query(&[("t", stamp)])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let source = parse_status(&body)?;

        if let Some(source) = &source {
            debug!("Status fetched: title={:?} listeners={:?}", source.title, source.listeners);
        }
        Ok(source)
    }
}

/// Repeating status fetch. Fetches run one after another inside the task,
/// so an older response can never land after a newer one.
pub struct MetadataPoller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MetadataPoller {
    pub fn spawn<S: StatusSource>(
        source: S,
        interval: Duration,
        tx: mpsc::Sender<Response>,
        token: CancellationToken,
    ) -> Self {
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                // First tick fires immediately: the startup fetch
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    _ = task_token.cancelled() => break,
                    result = source.fetch_status() => result,
                };

                if tx.send(Response::Metadata(result)).await.is_err() {
                    break;
                }
            }
            debug!("Metadata poller stopped");
        });

        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn join(self) {
        self.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_process_metadata_splits_artist_and_title() {
        let np = process_metadata("Artist - Title", "Mufique Radio");
        assert_eq!(np, NowPlaying::new("Artist", "Title"));
    }

    #[test]
    fn test_process_metadata_without_separator() {
        let np = process_metadata("SoloTitle", "Mufique Radio");
        assert_eq!(np.title, "SoloTitle");
        assert_eq!(np.artist, "Mufique Radio");
    }

    #[test]
    fn test_process_metadata_drops_segments_after_the_title() {
        let np = process_metadata("Los Andes - Canto - Live", "Mufique Radio");
        assert_eq!(np.artist, "Los Andes");
        assert_eq!(np.title, "Canto");
    }

    #[test]
    fn test_process_metadata_hyphen_without_spaces_is_not_a_separator() {
        let np = process_metadata("Jay-Z", "Mufique Radio");
        assert_eq!(np.artist, "Mufique Radio");
        assert_eq!(np.title, "Jay-Z");
    }

    #[test]
    fn test_parse_status_single_source() {
        let body = r#"{"icestats":{"admin":"x","source":{"title":"A - B","listeners":7,"server_name":"Mufique"}}}"#;
        let source = parse_status(body).unwrap().unwrap();
        assert_eq!(source.title.as_deref(), Some("A - B"));
        assert_eq!(source.listeners, Some(7));
        assert_eq!(source.server_name.as_deref(), Some("Mufique"));
    }

    #[test]
    fn test_parse_status_source_array_uses_first() {
        let body = r#"{"icestats":{"source":[{"title":"First - One","listeners":"12"},{"title":"Second - Two"}]}}"#;
        let source = parse_status(body).unwrap().unwrap();
        assert_eq!(source.title.as_deref(), Some("First - One"));
        assert_eq!(source.listeners, Some(12));
    }

    #[test]
    fn test_parse_status_missing_fields() {
        assert!(parse_status(r#"{"icestats":{}}"#).unwrap().is_none());
        assert!(parse_status(r#"{}"#).unwrap().is_none());
        assert!(parse_status(r#"{"icestats":{"source":[]}}"#).unwrap().is_none());

        let untitled = parse_status(r#"{"icestats":{"source":{"listeners":3}}}"#)
            .unwrap()
            .unwrap();
        assert!(untitled.title.is_none());
    }

    #[test]
    fn test_parse_status_rejects_invalid_json() {
        assert!(parse_status("<html>blocked</html>").is_err());
    }

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    impl StatusSource for CountingSource {
        async fn fetch_status(&self) -> Result<Option<SourceStatus>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(SourceStatus {
                title: Some(format!("Artist - Track {}", n)),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn test_poller_fetches_at_startup_and_stops_on_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(8);
        let poller = MetadataPoller::spawn(
            CountingSource { calls: calls.clone() },
            Duration::from_secs(3600),
            tx,
            CancellationToken::new(),
        );

        match rx.recv().await {
            Some(Response::Metadata(Ok(Some(source)))) => {
                assert_eq!(source.title.as_deref(), Some("Artist - Track 0"));
            }
            other => panic!("unexpected response: {:?}", other),
        }

        poller.join().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.recv().await.is_none());
    }
}
