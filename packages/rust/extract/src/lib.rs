//! Content extraction stages.
//!
//! Turns fetched pages and archive dumps into training text:
//! - [`WikiExtractor`]: encyclopedia HTML → Markdown-flavoured plain text
//! - [`RedditExtractor`]: forum thread HTML → one `<user>/<bot>` pair
//! - [`ArchiveLinker`]: Q&A dump XML → one `<user>/<bot>` pair per accepted answer
//!
//! The text normalisation shared by all three lives in [`cleanup`].

pub mod archive;
pub mod cleanup;
pub mod reddit;
pub mod wiki;

pub use archive::{ARCHIVE_ID_STRIDE, ArchiveIndex, ArchiveLinker, ArchiveRow, link_file, pair_id};
pub use cleanup::{clean_text, format_pair, strip_markup};
pub use reddit::{MIN_TEXT_LEN, RedditExtractor, extract_thread};
pub use wiki::{WikiExtractor, extract_article};
