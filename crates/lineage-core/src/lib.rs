//! Shared foundation for the Lineage crates.
//!
//! [`LineageError`] is the one error type every crate returns, and
//! [`LineageConfig`] is read from `.lineage.toml`. The version and hunk
//! types here are what the diff parser produces and the region tracker
//! consumes.

mod config;
mod error;
mod types;

pub use config::{
    CacheConfig, Granularity, LineageConfig, LlmConfig, QueueConfig, TrackerConfig,
};
pub use error::LineageError;
pub use types::{Hunk, LineTag, TaggedLine, Version, VersionBody};

/// A convenience `Result` type for Lineage operations.
pub type Result<T> = std::result::Result<T, LineageError>;
