//! Pipeline composition: mode → stage chain → running stream.

use std::sync::Arc;

use tracing::info;

use corpusforge_crawler::{BoundedFetch, Fetcher};
use corpusforge_discovery::{DirectorySource, IndexLinkSource, IndexQuery, LineFileSource};
use corpusforge_extract::{ArchiveLinker, RedditExtractor, WikiExtractor};
use corpusforge_shared::{
    AppConfig, CancellationToken, Mode, Result, Stage, TaskStream, empty_stream,
};

use crate::analyze::AnalyzeDataset;
use crate::sinks::{PlainTextWriter, QaWriter};

/// Start every stage, feeding each one the previous stage's output, and return
/// the output of the last stage.
///
/// Stages begin work as soon as they are started; the caller drives the chain
/// by draining the returned stream.
pub fn run_pipeline(stages: &[Box<dyn Stage>], cancel: &CancellationToken) -> TaskStream {
    let chain = stages
        .iter()
        .map(|stage| stage.name())
        .collect::<Vec<_>>()
        .join(" -> ");
    info!(%chain, "starting pipeline");

    let mut stream = None;
    for stage in stages {
        stream = Some(stage.run(stream, cancel.clone()));
    }
    stream.unwrap_or_else(empty_stream)
}

/// Assemble the stage chain for `mode`.
///
/// Fetching modes use `fetcher` under `config.defaults.workers`. The analysis
/// stage is appended unless `[analysis] enabled = false`.
pub fn build_stages(
    mode: Mode,
    config: &AppConfig,
    fetcher: Arc<dyn Fetcher>,
) -> Result<Vec<Box<dyn Stage>>> {
    let workers = config.defaults.workers;

    let mut stages: Vec<Box<dyn Stage>> = match mode {
        Mode::Wiki => vec![
            Box::new(LineFileSource::new(&config.wiki.url_file)),
            Box::new(BoundedFetch::new(fetcher, workers)),
            Box::new(WikiExtractor),
            Box::new(PlainTextWriter::new(&config.wiki.output)),
        ],
        Mode::Reddit => vec![
            Box::new(IndexLinkSource::new(IndexQuery::from(&config.reddit))?),
            Box::new(BoundedFetch::new(fetcher, workers)),
            Box::new(RedditExtractor),
            Box::new(QaWriter::new(&config.reddit.output)),
        ],
        Mode::Stack => vec![
            Box::new(DirectorySource::new(
                &config.stack.directory,
                &config.stack.extension,
            )),
            Box::new(ArchiveLinker::new(config.stack.min_score)),
            Box::new(QaWriter::new(&config.stack.output)),
        ],
    };

    if config.analysis.enabled {
        stages.push(Box::new(AnalyzeDataset::from_config(
            &config.analysis,
            config.output_for(mode),
        )));
    }

    Ok(stages)
}
