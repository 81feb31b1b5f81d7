//! Source stages: where a corpus pipeline's tasks come from.
//!
//! Sources ignore their input stream and produce tasks from the outside world:
//! - [`LineFileSource`] — one URL per line of a local file
//! - [`DirectorySource`] — one task per dump file in a directory
//! - [`IndexLinkSource`] — unique URLs discovered by paging a crawl index

mod files;
mod index;

pub use files::{DirectorySource, LineFileSource};
pub use index::{IndexLinkSource, IndexQuery};

/// User-Agent string for index requests.
pub(crate) const USER_AGENT: &str = concat!("corpusforge/", env!("CARGO_PKG_VERSION"));
