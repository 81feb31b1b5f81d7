//! Local file sources: a newline-delimited URL list and a dump directory.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};

use corpusforge_shared::{
    CancellationToken, Stage, Task, TaskSender, TaskStream, send_task, task_channel,
};

// ---------------------------------------------------------------------------
// LineFileSource
// ---------------------------------------------------------------------------

/// Emits one task per line of a text file, `url` set to the trimmed line.
///
/// IDs count up from zero in file order. A file that cannot be opened yields
/// an empty stream.
#[derive(Debug, Clone)]
pub struct LineFileSource {
    path: PathBuf,
}

impl LineFileSource {
    /// Read URLs from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Stage for LineFileSource {
    fn name(&self) -> &str {
        "line-file"
    }

    fn run(&self, _input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        let path = self.path.clone();
        tokio::spawn(async move { stream_lines(&path, &tx, &cancel).await });
        rx
    }
}

#[instrument(skip_all, fields(path = %path.display()))]
async fn stream_lines(path: &Path, tx: &TaskSender, cancel: &CancellationToken) {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "failed to open URL file");
            return;
        }
    };

    let mut reader = BufReader::new(file);
    let mut buf: Vec<u8> = Vec::new();
    let mut id: u64 = 0;

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("stopping URL file reading, pipeline cancelled");
                return;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {
                // Invalid UTF-8 is replaced, not fatal: every line yields a task.
                let line = String::from_utf8_lossy(&buf);
                if !send_task(tx, Task::with_url(id, line.trim()), cancel).await {
                    debug!(id, "downstream closed or cancelled");
                    return;
                }
                id += 1;
            }
            Err(e) => {
                warn!(error = %e, "error reading URL file");
                break;
            }
        }
    }

    info!(lines = id, "finished reading URL file");
}

// ---------------------------------------------------------------------------
// DirectorySource
// ---------------------------------------------------------------------------

/// Emits one task per file in `directory` whose extension matches, `source`
/// set to the file path.
///
/// IDs count up from zero in path order; callers should not rely on it.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    directory: PathBuf,
    extension: String,
}

impl DirectorySource {
    /// Enumerate `*.{extension}` files in `directory`.
    pub fn new(directory: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.into(),
        }
    }
}

impl Stage for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    fn run(&self, _input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        let directory = self.directory.clone();
        let extension = self.extension.clone();
        tokio::spawn(async move { stream_files(directory, extension, &tx, &cancel).await });
        rx
    }
}

#[instrument(skip_all, fields(directory = %directory.display()))]
async fn stream_files(
    directory: PathBuf,
    extension: String,
    tx: &TaskSender,
    cancel: &CancellationToken,
) {
    info!("scanning directory");

    let files = match list_files(&directory, &extension).await {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "cannot read dump directory");
            return;
        }
    };

    if files.is_empty() {
        info!(extension = %extension, "no matching files found");
        return;
    }

    let total = files.len();
    for (id, file) in (0u64..).zip(files) {
        if !send_task(tx, Task::with_source(id, file), cancel).await {
            debug!(id, "downstream closed or cancelled");
            return;
        }
    }

    info!(files = total, "all files queued");
}

/// Regular files in `directory` whose extension is exactly `extension`,
/// sorted by path. Unreadable entries are skipped.
async fn list_files(directory: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut files = Vec::new();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if is_file && path.extension().is_some_and(|ext| ext == extension) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
