/// Errors that can occur across the Lineage workspace.
///
/// Each variant wraps a specific error domain. Most of them are recovered
/// close to where they happen (a skipped hunk header, a placeholder chunk,
/// a failed task); the ones that surface to callers are reported per item
/// rather than aborting a whole batch.
///
/// # Examples
///
/// ```
/// use lineage_core::LineageError;
///
/// let err = LineageError::MissingVersion {
///     version: "v3".into(),
///     reason: "file not found".into(),
/// };
/// assert!(err.to_string().contains("v3"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum LineageError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed diff input.
    #[error("parse error: {0}")]
    Parse(String),

    /// Version content could not be read from its source.
    #[error("version {version} unavailable: {reason}")]
    MissingVersion {
        /// Identifier of the version that could not be loaded.
        version: String,
        /// Why the source could not provide it.
        reason: String,
    },

    /// A history append would move a region's history backwards.
    #[error("history order violation for region {region}: {detail}")]
    HistoryOrder {
        /// Region whose history rejected the entry.
        region: String,
        /// Description of the offending entry.
        detail: String,
    },

    /// SQLite or store-level failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The external analyzer failed.
    #[error("analyzer error: {0}")]
    Analyzer(String),

    /// The external analyzer did not answer in time.
    #[error("analysis timed out after {0} ms")]
    Timeout(u64),

    /// Task queue misuse or internal failure.
    #[error("queue error: {0}")]
    Queue(String),
}
