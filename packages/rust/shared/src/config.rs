//! Application configuration for corpusforge.
//!
//! User config lives at `~/.corpusforge/corpusforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CorpusError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "corpusforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".corpusforge";

/// Concurrent fetches when `[defaults] workers` is not set.
pub const DEFAULT_WORKERS: usize = 20;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Which corpus pipeline to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Encyclopedia pages listed in a URL file.
    #[default]
    Wiki,
    /// Forum threads discovered through a crawl index.
    Reddit,
    /// Q&A archive dumps in a local directory.
    Stack,
}

impl Mode {
    /// Lowercase name used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wiki => "wiki",
            Self::Reddit => "reddit",
            Self::Stack => "stack",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = CorpusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wiki" => Ok(Self::Wiki),
            "reddit" => Ok(Self::Reddit),
            "stack" => Ok(Self::Stack),
            other => Err(CorpusError::config(format!(
                "unknown mode '{other}': expected 'wiki', 'reddit', or 'stack'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Config structs (matching corpusforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Encyclopedia pipeline.
    #[serde(default)]
    pub wiki: WikiConfig,

    /// Forum pipeline.
    #[serde(default)]
    pub reddit: RedditConfig,

    /// Archive dump pipeline.
    #[serde(default)]
    pub stack: StackConfig,

    /// Post-run dataset analysis.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    /// Output dataset path for the given mode.
    pub fn output_for(&self, mode: Mode) -> &Path {
        match mode {
            Mode::Wiki => &self.wiki.output,
            Mode::Reddit => &self.reddit.output,
            Mode::Stack => &self.stack.output,
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Pipeline run when no `--mode` flag is given.
    #[serde(default)]
    pub mode: Mode,

    /// Concurrent fetches in the bounded fetch stage.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// `[wiki]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    /// Newline-delimited URL list.
    #[serde(default = "default_url_file")]
    pub url_file: PathBuf,

    /// Plain-text dataset written by this pipeline.
    #[serde(default = "default_wiki_output")]
    pub output: PathBuf,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            url_file: default_url_file(),
            output: default_wiki_output(),
        }
    }
}

fn default_url_file() -> PathBuf {
    "urls.txt".into()
}
fn default_wiki_output() -> PathBuf {
    "dataset_wiki.txt".into()
}

/// `[reddit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    /// Base URL of the crawl index service.
    #[serde(default = "default_index_base")]
    pub index_base: String,

    /// Crawl collection to query (e.g. `CC-MAIN-2023-50`).
    #[serde(default = "default_collection")]
    pub collection: String,

    /// URL pattern passed to the index.
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Label used in progress logs.
    #[serde(default = "default_label")]
    pub label: String,

    /// Maximum index pages to scan.
    #[serde(default = "default_num_pages")]
    pub num_pages: u32,

    /// Stop after this many unique URLs.
    #[serde(default = "default_target")]
    pub target: usize,

    /// Sleep after a failed page, in seconds.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Sleep after each scanned page, in seconds.
    #[serde(default = "default_page_delay_secs")]
    pub page_delay_secs: u64,

    /// Timeout for one index page request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hostname replaced in every discovered URL.
    #[serde(default = "default_rewrite_from")]
    pub rewrite_from: String,

    /// Replacement hostname.
    #[serde(default = "default_rewrite_to")]
    pub rewrite_to: String,

    /// Q&A dataset written by this pipeline.
    #[serde(default = "default_reddit_output")]
    pub output: PathBuf,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            index_base: default_index_base(),
            collection: default_collection(),
            pattern: default_pattern(),
            label: default_label(),
            num_pages: default_num_pages(),
            target: default_target(),
            backoff_secs: default_backoff_secs(),
            page_delay_secs: default_page_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            rewrite_from: default_rewrite_from(),
            rewrite_to: default_rewrite_to(),
            output: default_reddit_output(),
        }
    }
}

fn default_index_base() -> String {
    "http://index.commoncrawl.org".into()
}
fn default_collection() -> String {
    "CC-MAIN-2023-50".into()
}
fn default_pattern() -> String {
    "*.reddit.com/r/*/comments/*/*/*".into()
}
fn default_label() -> String {
    "Reddit".into()
}
fn default_num_pages() -> u32 {
    15
}
fn default_target() -> usize {
    5000
}
fn default_backoff_secs() -> u64 {
    2
}
fn default_page_delay_secs() -> u64 {
    1
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_rewrite_from() -> String {
    "www.reddit.com".into()
}
fn default_rewrite_to() -> String {
    "old.reddit.com".into()
}
fn default_reddit_output() -> PathBuf {
    "dataset_reddit.txt".into()
}

/// `[stack]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Directory holding the dump files.
    #[serde(default = "default_dump_dir")]
    pub directory: PathBuf,

    /// File extension of dump files.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Minimum answer score kept for linking.
    #[serde(default = "default_min_score")]
    pub min_score: i64,

    /// Q&A dataset written by this pipeline.
    #[serde(default = "default_stack_output")]
    pub output: PathBuf,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            directory: default_dump_dir(),
            extension: default_extension(),
            min_score: default_min_score(),
            output: default_stack_output(),
        }
    }
}

fn default_dump_dir() -> PathBuf {
    "./xml_dump".into()
}
fn default_extension() -> String {
    "xml".into()
}
fn default_min_score() -> i64 {
    1
}
fn default_stack_output() -> PathBuf {
    "dataset_stackoverflow.txt".into()
}

/// `[analysis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Run the analysis tool once the dataset is written.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter or executable to launch.
    #[serde(default = "default_program")]
    pub program: String,

    /// Script passed as the first argument, before the dataset path.
    #[serde(default = "default_script")]
    pub script: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_program(),
            script: default_script(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_program() -> String {
    "python".into()
}
fn default_script() -> String {
    "analyze_dataset.py".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.corpusforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CorpusError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.corpusforge/corpusforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CorpusError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CorpusError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CorpusError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CorpusError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CorpusError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
