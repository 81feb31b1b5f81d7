//! HTTP retrieval behind a small trait so the fetch stage can be exercised
//! without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONNECTION;
use tracing::debug;

use corpusforge_shared::{CorpusError, Result};

/// User-Agent string for page requests.
pub const USER_AGENT: &str = concat!("corpusforge/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout, covering connect through body read.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Retrieves the body behind a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and return its body as text.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain GET over reqwest with a fixed timeout and `Connection: close`.
///
/// Any response whose body can be read counts as a success, whatever its
/// status code.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build the shared client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(CONNECTION, "close")
            .send()
            .await
            .map_err(|e| CorpusError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CorpusError::Network(format!("{url}: body read failed: {e}")))?;

        debug!(url, %status, bytes = body.len(), "fetched");
        Ok(body)
    }
}
