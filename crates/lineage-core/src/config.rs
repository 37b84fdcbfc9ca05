use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LineageError;

/// Top-level configuration loaded from `.lineage.toml`.
///
/// Every section is optional; an empty file yields the defaults.
///
/// # Examples
///
/// ```
/// use lineage_core::LineageConfig;
///
/// let config = LineageConfig::default();
/// assert_eq!(config.queue.workers, 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineageConfig {
    /// Region tracking settings.
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Background analysis queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Analysis cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

impl LineageConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Io`] if the file cannot be read, or
    /// [`LineageError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lineage_core::LineageConfig;
    /// use std::path::Path;
    ///
    /// let config = LineageConfig::from_file(Path::new(".lineage.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, LineageError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Toml`] if parsing fails, or
    /// [`LineageError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use lineage_core::LineageConfig;
    ///
    /// let toml = r#"
    /// [queue]
    /// workers = 4
    /// "#;
    /// let config = LineageConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.queue.workers, 4);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, LineageError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LineageError> {
        if self.queue.workers == 0 {
            return Err(LineageError::Config(
                "queue.workers must be at least 1".into(),
            ));
        }
        if self.tracker.heading_marker.is_empty() {
            return Err(LineageError::Config(
                "tracker.heading_marker must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// How a full-text version is cut into regions.
///
/// # Examples
///
/// ```
/// use lineage_core::Granularity;
///
/// assert_eq!(Granularity::default(), Granularity::Paragraph);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Blank lines and heading lines delimit chunks.
    #[default]
    Paragraph,
    /// Every non-blank line is its own chunk.
    Line,
}

/// Region tracker configuration.
///
/// # Examples
///
/// ```
/// use lineage_core::TrackerConfig;
///
/// let config = TrackerConfig::default();
/// assert_eq!(config.heading_marker, "#");
/// assert_eq!(config.placeholder_for("v2"), "[missing version v2]");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Chunking granularity (default: paragraph).
    #[serde(default)]
    pub granularity: Granularity,
    /// Prefix that marks a heading line (default: `"#"`).
    #[serde(default = "default_heading_marker")]
    pub heading_marker: String,
    /// Placeholder text for unreadable versions; `{id}` is replaced by the version id.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_heading_marker() -> String {
    "#".into()
}

fn default_placeholder() -> String {
    "[missing version {id}]".into()
}

impl TrackerConfig {
    /// Render the placeholder line for a missing version.
    pub fn placeholder_for(&self, version_id: &str) -> String {
        self.placeholder.replace("{id}", version_id)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            heading_marker: default_heading_marker(),
            placeholder: default_placeholder(),
        }
    }
}

/// Analysis task queue configuration.
///
/// # Examples
///
/// ```
/// use lineage_core::QueueConfig;
///
/// let config = QueueConfig::default();
/// assert_eq!(config.workers, 1);
/// assert_eq!(config.analyze_timeout_ms, 30_000);
/// assert_eq!(config.max_error_chars, 200);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of background workers (default: 1, which keeps FIFO completion).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound for a single analyzer call in milliseconds (default: 30000).
    #[serde(default = "default_analyze_timeout_ms")]
    pub analyze_timeout_ms: u64,
    /// How long `stop()` waits for each worker before abandoning it (default: 1000).
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// How often idle workers re-check the running flag (default: 100).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Failed-task error messages are truncated to this many characters (default: 200).
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
}

fn default_workers() -> usize {
    1
}

fn default_analyze_timeout_ms() -> u64 {
    30_000
}

fn default_join_timeout_ms() -> u64 {
    1_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_error_chars() -> usize {
    200
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            analyze_timeout_ms: default_analyze_timeout_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_error_chars: default_max_error_chars(),
        }
    }
}

/// Analysis cache configuration.
///
/// # Examples
///
/// ```
/// use lineage_core::CacheConfig;
///
/// let config = CacheConfig::default();
/// assert_eq!(config.keep_versions, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path (default: `.lineage/cache.db`).
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Versions kept per key by an explicit cleanup (default: 3).
    #[serde(default = "default_keep_versions")]
    pub keep_versions: usize,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".lineage/cache.db")
}

fn default_keep_versions() -> usize {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            keep_versions: default_keep_versions(),
        }
    }
}

/// LLM provider configuration.
///
/// # Examples
///
/// ```
/// use lineage_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "mistral:latest");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (e.g. `"ollama"`, `"openai"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// HTTP timeout per request in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "ollama".into()
}

fn default_model() -> String {
    "mistral:latest".into()
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
