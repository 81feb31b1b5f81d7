//! Core domain types flowing through a corpusforge pipeline.

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The unit of data and work handed from one stage to the next.
///
/// A stage receives a `Task` by value and emits new values; nothing downstream
/// ever holds a reference into a record an upstream stage still owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Task {
    /// Identifier whose meaning and uniqueness scope belong to the producing stage.
    pub id: u64,
    /// Remote location, set by URL sources and carried through fetching.
    pub url: Option<String>,
    /// Local file the task was derived from (archive dumps only).
    pub source: Option<PathBuf>,
    /// Fetched or extracted payload.
    pub content: Option<String>,
}

impl Task {
    /// A task pointing at a remote URL.
    pub fn with_url(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// A task pointing at a local file.
    pub fn with_source(id: u64, source: impl Into<PathBuf>) -> Self {
        Self {
            id,
            source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Content as a string slice, empty when unset.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Size of the payload in bytes.
    pub fn content_len(&self) -> usize {
        self.content.as_ref().map_or(0, String::len)
    }
}
