//! Unified-diff parsing and content-hash region identity.
//!
//! [`parser`] turns unified-diff text into [`lineage_core::Hunk`]s without
//! ever failing on malformed input; [`identity`] derives the stable region
//! id every other crate keys history by.

pub mod identity;
pub mod parser;
