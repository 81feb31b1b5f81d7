//! The bounded fetch stage.
//!
//! Incoming tasks are fanned out to concurrent fetch units, at most `workers`
//! at a time, and fanned back in to a single output stream. A semaphore permit
//! is taken *before* a unit is spawned, so a saturated limiter stops the stage
//! from pulling more work off its input. The output closes only after intake
//! has ended and every spawned unit has finished.
//!
//! Completions interleave freely: output order is not input order.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use corpusforge_shared::{
    CancellationToken, CorpusError, Stage, Task, TaskSender, TaskStream, recv_task, send_task,
    task_channel,
};

use crate::fetch::Fetcher;

// ---------------------------------------------------------------------------
// BoundedFetch
// ---------------------------------------------------------------------------

/// Fetches the `url` of every incoming task under a fixed concurrency limit.
///
/// Successful fetches are emitted with `content` set and `id`/`url` preserved;
/// failed fetches are dropped after a warning.
pub struct BoundedFetch {
    fetcher: Arc<dyn Fetcher>,
    workers: usize,
}

impl BoundedFetch {
    /// Create a stage running at most `workers` fetches at once (minimum 1).
    pub fn new(fetcher: Arc<dyn Fetcher>, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
        }
    }

    /// The effective worker limit.
    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Stage for BoundedFetch {
    fn name(&self) -> &str {
        "bounded-fetch"
    }

    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        let Some(input) = input else {
            return rx;
        };

        let fetcher = self.fetcher.clone();
        let workers = self.workers;
        tokio::spawn(async move { fan_out(fetcher, workers, input, tx, cancel).await });
        rx
    }
}

#[instrument(skip_all, fields(workers = workers))]
async fn fan_out(
    fetcher: Arc<dyn Fetcher>,
    workers: usize,
    mut input: TaskStream,
    tx: TaskSender,
    cancel: CancellationToken,
) {
    let limiter = Arc::new(Semaphore::new(workers));
    let tracker = TaskTracker::new();
    let mut dispatched: usize = 0;

    info!("fetch stage started");

    while let Some(task) = recv_task(&mut input, &cancel).await {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = limiter.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let fetcher = fetcher.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        dispatched += 1;

        tracker.spawn(async move {
            let _permit = permit;
            fetch_one(fetcher.as_ref(), task, &tx, &cancel).await;
        });
    }

    if cancel.is_cancelled() {
        info!(dispatched, "fetch intake stopped, pipeline cancelled");
    }

    // Barrier: no output is lost and the stream stays open until every
    // dispatched unit has finished.
    tracker.close();
    tracker.wait().await;

    info!(dispatched, "fetch stage finished");
}

/// Fetch a single task and forward the result. Errors drop the task.
async fn fetch_one(
    fetcher: &dyn Fetcher,
    task: Task,
    tx: &TaskSender,
    cancel: &CancellationToken,
) {
    let Some(url) = task.url.clone() else {
        warn!(id = task.id, "task has no URL, dropping");
        return;
    };

    let fetched = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CorpusError::Cancelled),
        fetched = fetcher.fetch(&url) => fetched,
    };

    match fetched {
        Ok(body) => {
            let out = Task {
                content: Some(body),
                source: None,
                ..task
            };
            if !send_task(tx, out, cancel).await {
                debug!("fetched page discarded, downstream gone");
            }
        }
        Err(CorpusError::Cancelled) => debug!(url = %url, "fetch aborted"),
        Err(e) => warn!(id = task.id, error = %e, "fetch failed, dropping task"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::fetch::HttpFetcher;
    use corpusforge_shared::Result;

    /// Feed `tasks` into a stage the way an upstream source would.
    fn feed(tasks: Vec<Task>, cancel: &CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for task in tasks {
                if !send_task(&tx, task, &cancel).await {
                    return;
                }
            }
        });
        rx
    }

    async fn collect(mut rx: TaskStream) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Some(task) = rx.recv().await {
            tasks.push(task);
        }
        tasks
    }

    /// Slow fetcher that records the peak number of concurrent calls.
    #[derive(Default)]
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("body of {url}"))
        }
    }

    #[tokio::test]
    async fn drops_unreachable_and_keeps_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let input = feed(
            vec![
                Task::with_url(7, format!("{}/ok", server.uri())),
                // Nothing listens on port 9 of the loopback interface.
                Task::with_url(8, "http://127.0.0.1:9/unreachable"),
            ],
            &cancel,
        );

        let stage = BoundedFetch::new(Arc::new(HttpFetcher::new().unwrap()), 4);
        let out = collect(stage.run(Some(input), cancel)).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 7);
        assert_eq!(out[0].url.as_deref(), Some(format!("{}/ok", server.uri()).as_str()));
        assert_eq!(out[0].content.as_deref(), Some("<p>hello</p>"));
    }

    #[tokio::test]
    async fn never_exceeds_worker_limit() {
        let fetcher = Arc::new(SlowFetcher {
            delay: Duration::from_millis(30),
            ..SlowFetcher::default()
        });
        let cancel = CancellationToken::new();
        let tasks = (0..24)
            .map(|i| Task::with_url(i, format!("https://example.com/{i}")))
            .collect();

        let stage = BoundedFetch::new(fetcher.clone(), 3);
        let out = collect(stage.run(Some(feed(tasks, &cancel)), cancel)).await;

        assert_eq!(out.len(), 24, "barrier must not lose output");
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak} exceeded limit");
        assert!(peak >= 2, "fetches should overlap, peak was {peak}");
    }

    #[tokio::test]
    async fn output_preserves_ids_regardless_of_order() {
        let fetcher = Arc::new(SlowFetcher {
            delay: Duration::from_millis(5),
            ..SlowFetcher::default()
        });
        let cancel = CancellationToken::new();
        let tasks = (0..10)
            .map(|i| Task::with_url(i, format!("https://example.com/{i}")))
            .collect();

        let stage = BoundedFetch::new(fetcher, 5);
        let out = collect(stage.run(Some(feed(tasks, &cancel)), cancel)).await;

        let by_id: HashMap<u64, String> = out
            .into_iter()
            .map(|t| (t.id, t.content.unwrap_or_default()))
            .collect();
        assert_eq!(by_id.len(), 10);
        assert_eq!(by_id[&4], "body of https://example.com/4");
    }

    #[tokio::test]
    async fn cancellation_closes_stream_promptly() {
        let fetcher = Arc::new(SlowFetcher {
            delay: Duration::from_secs(30),
            ..SlowFetcher::default()
        });
        let cancel = CancellationToken::new();
        let tasks = (0..50)
            .map(|i| Task::with_url(i, format!("https://example.com/{i}")))
            .collect();

        let stage = BoundedFetch::new(fetcher, 4);
        let rx = stage.run(Some(feed(tasks, &cancel)), cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let out = tokio::time::timeout(Duration::from_secs(2), collect(rx))
            .await
            .expect("stage must close its stream after cancellation");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn zero_workers_is_clamped() {
        let stage = BoundedFetch::new(Arc::new(SlowFetcher::default()), 0);
        assert_eq!(stage.workers(), 1);
    }

    #[tokio::test]
    async fn no_input_yields_empty_stream() {
        let stage = BoundedFetch::new(Arc::new(SlowFetcher::default()), 2);
        let out = collect(stage.run(None, CancellationToken::new())).await;
        assert!(out.is_empty());
    }
}
