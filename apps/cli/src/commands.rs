//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use corpusforge_core::{build_stages, run_pipeline};
use corpusforge_crawler::{Fetcher, HttpFetcher};
use corpusforge_shared::{
    AppConfig, CancellationToken, Mode, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// corpusforge: stream web pages and Q&A dumps into training datasets.
#[derive(Parser)]
#[command(
    name = "corpusforge",
    version,
    about = "Stream web pages and Q&A archive dumps into plain-text training datasets.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.corpusforge/corpusforge.toml.
    #[arg(long, global = true, env = "CORPUSFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a corpus pipeline until its dataset is written.
    Run {
        /// Pipeline to run: wiki, reddit, or stack (defaults to config).
        #[arg(short, long)]
        mode: Option<Mode>,

        /// Concurrent fetches (defaults to config).
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "corpusforge=info",
        1 => "corpusforge=debug",
        _ => "corpusforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { mode, workers } => cmd_run(config_path, mode, workers).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn cmd_run(
    config_path: Option<&Path>,
    mode: Option<Mode>,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(workers) = workers {
        config.defaults.workers = workers;
    }
    let mode = mode.unwrap_or(config.defaults.mode);

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
    let stages = build_stages(mode, &config, fetcher)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling pipeline");
                cancel.cancel();
            }
        }
    });

    info!(
        %mode,
        workers = config.defaults.workers,
        output = %config.output_for(mode).display(),
        "starting run"
    );
    let start = Instant::now();
    let progress = CliProgress::new(mode);

    let mut stream = run_pipeline(&stages, &cancel);
    let mut records: usize = 0;
    while let Some(task) = stream.recv().await {
        records += 1;
        debug!(id = task.id, bytes = task.content_len(), "record processed");
        progress.record(records);
    }

    progress.finish();
    let elapsed = start.elapsed();
    if cancel.is_cancelled() {
        warn!(records, elapsed_ms = elapsed.as_millis() as u64, "run cancelled");
    } else {
        info!(records, elapsed_ms = elapsed.as_millis() as u64, "run finished");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner shown while the final stream drains.
struct CliProgress {
    spinner: ProgressBar,
    mode: Mode,
}

impl CliProgress {
    fn new(mode: Mode) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.set_message(format!("running {mode} pipeline"));
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner, mode }
    }

    fn record(&self, count: usize) {
        self.spinner
            .set_message(format!("running {} pipeline: {count} records", self.mode));
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
