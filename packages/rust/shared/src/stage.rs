//! The stage contract and the cancellable stream primitives every stage uses.
//!
//! Stages are linked by bounded channels of capacity [`STREAM_CAPACITY`]. A
//! producer that runs ahead of its consumer parks on `send` until the consumer
//! catches up, which bounds memory across the whole chain. Dropping the sender
//! is the only end-of-data signal.
//!
//! Every blocking operation races the shared [`CancellationToken`] so a stalled
//! neighbour can never keep a stage alive after cancellation.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::Task;

/// Buffer size of every inter-stage channel.
pub const STREAM_CAPACITY: usize = 1;

/// Receiving half of a stage's output.
pub type TaskStream = mpsc::Receiver<Task>;

/// Sending half owned by the producing stage.
pub type TaskSender = mpsc::Sender<Task>;

/// Create the bounded channel a stage writes its output into.
pub fn task_channel() -> (TaskSender, TaskStream) {
    mpsc::channel(STREAM_CAPACITY)
}

/// A stream that is already closed.
pub fn empty_stream() -> TaskStream {
    let (_tx, rx) = task_channel();
    rx
}

/// A transform from an input stream of tasks to an output stream of tasks.
///
/// `run` spawns the stage's work onto the tokio runtime and returns the output
/// stream immediately. Sources ignore `input`; transforms and sinks given `None`
/// produce an empty stream.
pub trait Stage: Send + Sync {
    /// Human-readable stage name for tracing.
    fn name(&self) -> &str;

    /// Start the stage.
    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream;
}

/// Send `task` downstream, giving up if the pipeline is cancelled first.
///
/// Returns `false` when the stage should stop: either the token fired or the
/// consumer hung up.
pub async fn send_task(tx: &TaskSender, task: Task, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        res = tx.send(task) => res.is_ok(),
    }
}

/// Receive the next task, or `None` on end of stream or cancellation.
pub async fn recv_task(rx: &mut TaskStream, cancel: &CancellationToken) -> Option<Task> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        task = rx.recv() => task,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn send_blocks_until_consumer_reads() {
        let (tx, mut rx) = task_channel();
        let cancel = CancellationToken::new();

        assert!(send_task(&tx, Task::with_url(0, "a"), &cancel).await);

        // Channel is full: a second send must park.
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            send_task(&tx, Task::with_url(1, "b"), &cancel),
        )
        .await;
        assert!(pending.is_err(), "send should block on a full stream");

        assert_eq!(recv_task(&mut rx, &cancel).await.map(|t| t.id), Some(0));
    }

    #[tokio::test]
    async fn cancellation_releases_blocked_send() {
        let (tx, _rx) = task_channel();
        let cancel = CancellationToken::new();
        assert!(send_task(&tx, Task::default(), &cancel).await);

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { send_task(&tx, Task::default(), &cancel).await })
        };
        cancel.cancel();

        let sent = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("blocked send must observe cancellation")
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn recv_returns_none_when_cancelled_or_closed() {
        let (_tx, mut rx) = task_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(recv_task(&mut rx, &cancel).await.is_none());

        let mut closed = empty_stream();
        assert!(recv_task(&mut closed, &CancellationToken::new()).await.is_none());
    }

    #[tokio::test]
    async fn send_fails_after_consumer_drops() {
        let (tx, rx) = task_channel();
        drop(rx);
        assert!(!send_task(&tx, Task::default(), &CancellationToken::new()).await);
    }
}
