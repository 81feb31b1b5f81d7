//! Shared types, error model, pipeline contract, and configuration for corpusforge.
//!
//! This crate is the foundation depended on by all other corpusforge crates.
//! It provides:
//! - [`CorpusError`] — the unified error type
//! - [`Task`] — the only value that crosses stage boundaries
//! - [`Stage`] plus cancellable stream helpers ([`send_task`], [`recv_task`])
//! - Configuration ([`AppConfig`], [`Mode`], config loading)

pub mod config;
pub mod error;
pub mod stage;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalysisConfig, AppConfig, DEFAULT_WORKERS, DefaultsConfig, Mode, RedditConfig, StackConfig,
    WikiConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{CorpusError, Result};
pub use stage::{
    STREAM_CAPACITY, Stage, TaskSender, TaskStream, empty_stream, recv_task, send_task, task_channel,
};
pub use types::Task;

/// Cancellation token shared by every stage of one pipeline run.
pub use tokio_util::sync::CancellationToken;
