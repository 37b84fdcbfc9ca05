//! Region tracking across document versions.
//!
//! Content is cut into regions identified by a hash of their text, each
//! with an append-only history of how it changed from version to version.
//! [`tracker::RegionTracker`] writes into a [`store::RegionStore`],
//! [`index::RegionIndex`] reads volatility and stability views from it, and
//! [`archive::RegionArchive`] persists it to SQLite.

pub mod archive;
pub mod chunker;
pub mod index;
pub mod source;
pub mod store;
pub mod tracker;
