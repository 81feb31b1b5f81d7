//! Pipeline assembly for corpusforge.
//!
//! Ties the source, fetch and extraction stages from the library crates to
//! the dataset sinks and the post-run analysis trigger, and selects the chain
//! for each [`Mode`](corpusforge_shared::Mode).

pub mod analyze;
pub mod pipeline;
pub mod sinks;

pub use analyze::AnalyzeDataset;
pub use pipeline::{build_stages, run_pipeline};
pub use sinks::{PLAIN_SEPARATOR, PlainTextWriter, QaWriter};
