use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_DIR: &str = "mufique-radio";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default = "default_metadata_interval")]
    pub metadata_interval_secs: u64,
    #[serde(default = "default_theme_interval")]
    pub theme_interval_secs: u64,
    /// Shown as the artist when the on-air title has no " - " separator.
    #[serde(default = "default_artist")]
    pub default_artist: String,
    #[serde(default = "default_volume")]
    pub initial_volume: f32,
    #[serde(default = "default_true")]
    pub media_session: bool,
    /// Link shown in the chat panel.
    #[serde(default)]
    pub chat_url: Option<String>,
    #[serde(default = "default_alert_message")]
    pub alert_message: String,
    #[serde(default)]
    pub visualizer: VisualizerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sizing {
    /// Eighth-block glyphs, sub-cell bar heights.
    Scaled,
    /// Whole cells only.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarStyle {
    Flat,
    Glow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizerConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_sizing")]
    pub sizing: Sizing,
    #[serde(default = "default_style")]
    pub style: BarStyle,
}

/// Offline copy of the web player's shell assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_name")]
    pub name: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    /// Base URL the asset paths are resolved against. Registration is
    /// skipped at startup while this is unset.
    #[serde(default)]
    pub shell_base_url: Option<String>,
    /// Storage root; defaults to `<cache_dir>/mufique-radio/buckets`.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            sizing: default_sizing(),
            style: default_style(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            assets: default_assets(),
            shell_base_url: None,
            storage_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn storage_root(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| cache_dir().join("buckets"))
    }
}

fn default_stream_url() -> String {
    "https://server6.globalhostla.com:9422/stream".to_string()
}

fn default_metadata_url() -> String {
    "https://server6.globalhostla.com:9422/status-json.xsl".to_string()
}

fn default_metadata_interval() -> u64 {
    15
}

fn default_theme_interval() -> u64 {
    60
}

fn default_artist() -> String {
    "Mufique Radio".to_string()
}

fn default_volume() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_alert_message() -> String {
    "Conectando con el servidor del Páramo...".to_string()
}

fn default_fft_size() -> usize {
    256
}

fn default_sizing() -> Sizing {
    Sizing::Scaled
}

fn default_style() -> BarStyle {
    BarStyle::Glow
}

fn default_cache_name() -> String {
    "mufique-radio-v1".to_string()
}

fn default_assets() -> Vec<String> {
    ["./", "./index.html", "./style.css", "./script.js", "./manifest.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load from `path`, or from the default location. A missing file is
    /// created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        if !config_path.exists() {
            let config = Self::default();
            config.save(&config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the background tasks cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.metadata_interval_secs == 0 {
            anyhow::bail!("metadata_interval_secs must be at least 1");
        }
        if self.theme_interval_secs == 0 {
            anyhow::bail!("theme_interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_url: default_stream_url(),
            metadata_url: default_metadata_url(),
            metadata_interval_secs: default_metadata_interval(),
            theme_interval_secs: default_theme_interval(),
            default_artist: default_artist(),
            initial_volume: default_volume(),
            media_session: default_true(),
            chat_url: None,
            alert_message: default_alert_message(),
            visualizer: VisualizerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
