//! Change analysis for tracked regions.
//!
//! An [`analyzer::Analyzer`] turns an old/new pair of texts into an
//! [`types::AnalysisResult`]. [`queue::AnalysisTaskQueue`] runs analyzers on
//! background workers and stores their results in the append-only
//! [`cache::AnalysisCache`].

pub mod analyzer;
pub mod cache;
pub mod llm;
pub mod prompt;
pub mod queue;
pub mod types;
