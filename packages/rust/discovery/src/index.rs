//! Paginated crawl-index link discovery.
//!
//! Pages through a CDX-style index (`{base}/{collection}-index?url=...&output=json&page=N`)
//! and emits every unique URL whose capture status is `200`, until the page
//! budget, the target count, or a 404 (index exhausted) is reached.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use corpusforge_shared::{
    CancellationToken, CorpusError, RedditConfig, Result, Stage, Task, TaskSender, TaskStream,
    send_task, task_channel,
};

use crate::USER_AGENT;

// ---------------------------------------------------------------------------
// IndexQuery
// ---------------------------------------------------------------------------

/// What to ask the index and how politely to page through it.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    /// Base URL of the index service.
    pub index_base: String,
    /// Crawl collection, e.g. `CC-MAIN-2023-50`.
    pub collection: String,
    /// URL pattern passed as the `url` query parameter.
    pub pattern: String,
    /// Label used in progress logs.
    pub label: String,
    /// Maximum number of pages to request.
    pub num_pages: u32,
    /// Stop once this many unique URLs have been emitted.
    pub target: usize,
    /// Sleep after a failed page before moving to the next one.
    pub backoff: Duration,
    /// Sleep after each successfully scanned page.
    pub page_delay: Duration,
    /// Timeout for one page request, body included.
    pub request_timeout: Duration,
    /// Hostname replaced (first occurrence) in every emitted URL.
    pub rewrite_from: String,
    /// Replacement hostname.
    pub rewrite_to: String,
}

impl IndexQuery {
    /// Build the request URL for `page`.
    pub fn page_url(&self, page: u32) -> Result<Url> {
        let base = self.index_base.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{}-index", self.collection)).map_err(|e| {
            CorpusError::config(format!("invalid index base '{}': {e}", self.index_base))
        })?;
        url.query_pairs_mut()
            .append_pair("url", &self.pattern)
            .append_pair("output", "json")
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    /// Apply the hostname rewrite to a discovered URL.
    pub fn rewrite(&self, url: &str) -> String {
        if self.rewrite_from.is_empty() {
            return url.to_string();
        }
        url.replacen(&self.rewrite_from, &self.rewrite_to, 1)
    }
}

impl From<&RedditConfig> for IndexQuery {
    fn from(config: &RedditConfig) -> Self {
        Self {
            index_base: config.index_base.clone(),
            collection: config.collection.clone(),
            pattern: config.pattern.clone(),
            label: config.label.clone(),
            num_pages: config.num_pages,
            target: config.target,
            backoff: Duration::from_secs(config.backoff_secs),
            page_delay: Duration::from_secs(config.page_delay_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            rewrite_from: config.rewrite_from.clone(),
            rewrite_to: config.rewrite_to.clone(),
        }
    }
}

impl Default for IndexQuery {
    fn default() -> Self {
        Self::from(&RedditConfig::default())
    }
}

/// One JSON line of an index response. Only these two fields matter.
#[derive(Debug, Deserialize)]
struct IndexRecord {
    url: String,
    status: String,
}

// ---------------------------------------------------------------------------
// IndexLinkSource
// ---------------------------------------------------------------------------

/// Source stage emitting unique `200` URLs from a paginated crawl index.
pub struct IndexLinkSource {
    query: IndexQuery,
    client: Client,
}

impl IndexLinkSource {
    /// Create a source for `query`.
    pub fn new(query: IndexQuery) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(query.request_timeout)
            .build()
            .map_err(|e| CorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { query, client })
    }
}

impl Stage for IndexLinkSource {
    fn name(&self) -> &str {
        "index-links"
    }

    fn run(&self, _input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        let client = self.client.clone();
        let query = self.query.clone();
        tokio::spawn(async move { scan_index(&client, &query, &tx, &cancel).await });
        rx
    }
}

/// Whether paging should go on after a record or page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Dedup state carried across pages.
struct LinkCollector<'a> {
    query: &'a IndexQuery,
    seen: HashSet<String>,
    emitted: usize,
}

impl<'a> LinkCollector<'a> {
    fn new(query: &'a IndexQuery) -> Self {
        Self {
            query,
            seen: HashSet::new(),
            emitted: 0,
        }
    }

    fn target_reached(&self) -> bool {
        self.emitted >= self.query.target
    }

    /// Handle one response line. Malformed lines are ignored.
    async fn accept_line(
        &mut self,
        line: &[u8],
        tx: &TaskSender,
        cancel: &CancellationToken,
    ) -> Flow {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Flow::Continue;
        }

        let record: IndexRecord = match serde_json::from_slice(line) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "skipping malformed index record");
                return Flow::Continue;
            }
        };

        if record.status == "200" && !self.seen.contains(&record.url) {
            let url = self.query.rewrite(&record.url);
            self.seen.insert(record.url);

            if !send_task(tx, Task::with_url(self.emitted as u64, url), cancel).await {
                return Flow::Stop;
            }
            self.emitted += 1;
        }

        if self.target_reached() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

#[instrument(skip_all, fields(label = %query.label, collection = %query.collection))]
async fn scan_index(
    client: &Client,
    query: &IndexQuery,
    tx: &TaskSender,
    cancel: &CancellationToken,
) {
    let mut collector = LinkCollector::new(query);

    for page in 0..query.num_pages {
        if collector.target_reached() {
            break;
        }

        info!(
            page,
            found = collector.emitted,
            target = query.target,
            "scanning index page"
        );

        let url = match query.page_url(page) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build index URL");
                return;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = client.get(url).send() => sent,
        };

        let response = match sent {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                info!(page, "index exhausted");
                break;
            }
            Ok(resp) if resp.status() == StatusCode::OK => resp,
            Ok(resp) => {
                warn!(page, status = %resp.status(), "index page failed, moving on");
                if !pause(query.backoff, cancel).await {
                    return;
                }
                continue;
            }
            Err(e) => {
                warn!(page, error = %e, "index request failed, moving on");
                if !pause(query.backoff, cancel).await {
                    return;
                }
                continue;
            }
        };

        if scan_page(response, &mut collector, tx, cancel).await == Flow::Stop {
            break;
        }

        if !pause(query.page_delay, cancel).await {
            return;
        }
    }

    info!(found = collector.emitted, "index scan finished");
}

/// Stream one page's body line by line into the collector.
async fn scan_page(
    mut response: reqwest::Response,
    collector: &mut LinkCollector<'_>,
    tx: &TaskSender,
    cancel: &CancellationToken,
) -> Flow {
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Flow::Stop,
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => pending.extend_from_slice(&bytes),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "index page body read failed");
                return Flow::Continue;
            }
        }

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            if collector.accept_line(&line[..pos], tx, cancel).await == Flow::Stop {
                return Flow::Stop;
            }
        }
    }

    if pending.is_empty() {
        Flow::Continue
    } else {
        collector.accept_line(&pending, tx, cancel).await
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
