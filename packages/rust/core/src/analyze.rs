//! Post-run dataset analysis trigger.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, instrument, warn};

use corpusforge_shared::{
    AnalysisConfig, CancellationToken, Stage, TaskSender, TaskStream, recv_task, send_task,
    task_channel,
};

/// Drains its input (forwarding every task), then launches
/// `program script dataset` with the caller's stdout/stderr.
///
/// The tool is a black box: a spawn failure or non-zero exit is logged and
/// otherwise ignored. Nothing runs if the pipeline was cancelled.
#[derive(Debug, Clone)]
pub struct AnalyzeDataset {
    program: String,
    script: String,
    dataset: PathBuf,
}

impl AnalyzeDataset {
    pub fn new(
        program: impl Into<String>,
        script: impl Into<String>,
        dataset: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
            dataset: dataset.into(),
        }
    }

    /// Build from the `[analysis]` config section.
    pub fn from_config(config: &AnalysisConfig, dataset: impl Into<PathBuf>) -> Self {
        Self::new(&config.program, &config.script, dataset)
    }
}

impl Stage for AnalyzeDataset {
    fn name(&self) -> &str {
        "analyze-dataset"
    }

    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        if let Some(input) = input {
            let this = self.clone();
            tokio::spawn(async move { this.drain_then_analyze(input, tx, cancel).await });
        }
        rx
    }
}

impl AnalyzeDataset {
    async fn drain_then_analyze(
        self,
        mut input: TaskStream,
        tx: TaskSender,
        cancel: CancellationToken,
    ) {
        while let Some(task) = recv_task(&mut input, &cancel).await {
            if !send_task(&tx, task, &cancel).await {
                break;
            }
        }

        if cancel.is_cancelled() {
            info!("pipeline cancelled, skipping dataset analysis");
            return;
        }

        self.analyze(&cancel).await;
    }

    #[instrument(skip_all, fields(program = %self.program, dataset = %self.dataset.display()))]
    async fn analyze(&self, cancel: &CancellationToken) {
        info!("running dataset analysis");

        let mut child = match Command::new(&self.program)
            .arg(&self.script)
            .arg(&self.dataset)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to launch analysis tool. Is `{}` installed?", self.program);
                return;
            }
        };

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("pipeline cancelled, stopping analysis tool");
                return;
            }
            status = child.wait() => status,
        };

        match status {
            Ok(status) if status.success() => info!("dataset analysis finished"),
            Ok(status) => warn!(?status, "analysis tool exited with an error"),
            Err(e) => warn!(error = %e, "analysis tool wait error"),
        }
    }
}
