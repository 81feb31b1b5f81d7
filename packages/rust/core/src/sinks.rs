//! Sink stages writing the dataset file.
//!
//! Both writers own their output file exclusively for the lifetime of the
//! pipeline and flush it before closing their own output stream, so a stage
//! chained after a sink only ever sees a fully written file.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use corpusforge_shared::{
    CancellationToken, CorpusError, Result, Stage, Task, TaskSender, TaskStream, recv_task,
    send_task, task_channel,
};

/// Written after every record by [`PlainTextWriter`].
pub const PLAIN_SEPARATOR: &str = "\n\n\n\n<eos>\n";

/// Create (or truncate) `path`, creating its parent directory when missing.
async fn open_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CorpusError::io(parent, e))?;
    }
    let file = File::create(path)
        .await
        .map_err(|e| CorpusError::io(path, e))?;
    Ok(BufWriter::new(file))
}

async fn close_output(path: &Path, mut writer: BufWriter<File>) {
    if let Err(e) = writer.flush().await {
        warn!(path = %path.display(), error = %e, "failed to flush dataset");
    }
}

// ---------------------------------------------------------------------------
// PlainTextWriter
// ---------------------------------------------------------------------------

/// Appends each task's content plus [`PLAIN_SEPARATOR`] to a file and passes
/// the task through unchanged.
#[derive(Debug, Clone)]
pub struct PlainTextWriter {
    path: PathBuf,
}

impl PlainTextWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Stage for PlainTextWriter {
    fn name(&self) -> &str {
        "plain-text-writer"
    }

    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        if let Some(input) = input {
            let path = self.path.clone();
            tokio::spawn(async move { write_plain(path, input, tx, cancel).await });
        }
        rx
    }
}

#[instrument(skip_all, fields(path = %path.display()))]
async fn write_plain(
    path: PathBuf,
    mut input: TaskStream,
    tx: TaskSender,
    cancel: CancellationToken,
) {
    let mut writer = match open_output(&path).await {
        Ok(writer) => writer,
        Err(e) => {
            warn!(error = %e, "cannot create dataset file");
            return;
        }
    };

    let mut written: usize = 0;
    while let Some(task) = recv_task(&mut input, &cancel).await {
        // A task without content still gets its separator.
        if let Err(e) = write_record(&mut writer, task.content_str(), PLAIN_SEPARATOR).await {
            warn!(id = task.id, error = %e, "write failed, stopping sink");
            break;
        }
        written += 1;
        debug!(id = task.id, bytes = task.content_len(), "record written");
        if !send_task(&tx, task, &cancel).await {
            break;
        }
    }

    close_output(&path, writer).await;
    info!(records = written, "dataset written");
}

// ---------------------------------------------------------------------------
// QaWriter
// ---------------------------------------------------------------------------

/// Appends each task's pre-formatted `<user>/<bot>` block verbatim. Nothing is
/// forwarded; the output stream closes once the file is complete.
#[derive(Debug, Clone)]
pub struct QaWriter {
    path: PathBuf,
}

impl QaWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Stage for QaWriter {
    fn name(&self) -> &str {
        "qa-writer"
    }

    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        if let Some(input) = input {
            let path = self.path.clone();
            tokio::spawn(async move {
                write_pairs(&path, input, &cancel).await;
                // Completion is signalled by dropping the sender after the file closes.
                drop(tx);
            });
        }
        rx
    }
}

#[instrument(skip_all, fields(path = %path.display()))]
async fn write_pairs(path: &Path, mut input: TaskStream, cancel: &CancellationToken) {
    let mut writer = match open_output(path).await {
        Ok(writer) => writer,
        Err(e) => {
            warn!(error = %e, "cannot create dataset file");
            return;
        }
    };

    let mut count: usize = 0;
    while let Some(task) = recv_task(&mut input, cancel).await {
        let Some(content) = task.content.as_deref() else {
            debug!(id = task.id, "task has no content, skipping");
            continue;
        };
        if let Err(e) = write_record(&mut writer, content, "").await {
            warn!(id = task.id, error = %e, "write failed, stopping sink");
            break;
        }
        count += 1;
    }

    close_output(path, writer).await;
    info!(pairs = count, "saved Q&A pairs");
}

async fn write_record(
    writer: &mut BufWriter<File>,
    content: &str,
    separator: &str,
) -> std::io::Result<()> {
    writer.write_all(content.as_bytes()).await?;
    if !separator.is_empty() {
        writer.write_all(separator.as_bytes()).await?;
    }
    Ok(())
}
