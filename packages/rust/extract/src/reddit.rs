//! Forum thread extraction.
//!
//! Reads an old-style Reddit thread page and pairs the submission (title plus
//! self-text) with the first top-level comment.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

use corpusforge_shared::{
    CancellationToken, Stage, Task, TaskSender, TaskStream, recv_task, send_task, task_channel,
};

use crate::cleanup::{clean_text, format_pair};

/// Question and answer must each be longer than this many characters.
pub const MIN_TEXT_LEN: usize = 10;

/// Extract the thread as one formatted `<user>/<bot>` record, or `None` when
/// either side is too short.
pub fn extract_thread(html: &str) -> Option<String> {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a.title").expect("valid selector"));
    static SELFTEXT_SEL: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.expando div.usertext-body").expect("valid selector")
    });
    // Direct children only: nested replies are not top-level comments.
    static TOP_COMMENT_SEL: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.commentarea > div.sitetable > div.thing").expect("valid selector")
    });
    static COMMENT_BODY_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.usertext-body").expect("valid selector"));

    let doc = Html::parse_document(html);

    let title = doc.select(&TITLE_SEL).next().map(text_of).unwrap_or_default();
    let body = doc.select(&SELFTEXT_SEL).next().map(text_of).unwrap_or_default();
    let question = clean_text(&format!("{title}\n{body}"));

    let answer = doc
        .select(&TOP_COMMENT_SEL)
        .next()
        .and_then(|comment| comment.select(&COMMENT_BODY_SEL).next())
        .map(text_of)
        .unwrap_or_default();
    let answer = clean_text(&answer);

    if question.chars().count() <= MIN_TEXT_LEN || answer.chars().count() <= MIN_TEXT_LEN {
        return None;
    }

    Some(format_pair(&question, &answer))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// Stage turning fetched thread pages into Q&A records.
#[derive(Debug, Clone, Default)]
pub struct RedditExtractor;

impl Stage for RedditExtractor {
    fn name(&self) -> &str {
        "reddit-extract"
    }

    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        if let Some(input) = input {
            tokio::spawn(async move { extract_all(input, &tx, &cancel).await });
        }
        rx
    }
}

#[instrument(skip_all)]
async fn extract_all(mut input: TaskStream, tx: &TaskSender, cancel: &CancellationToken) {
    let mut kept: usize = 0;
    let mut rejected: usize = 0;

    while let Some(task) = recv_task(&mut input, cancel).await {
        let Some(record) = extract_thread(task.content_str()) else {
            debug!(id = task.id, url = ?task.url, "thread too short, dropping");
            rejected += 1;
            continue;
        };

        let out = Task {
            id: task.id,
            content: Some(record),
            ..Task::default()
        };
        if !send_task(tx, out, cancel).await {
            return;
        }
        kept += 1;
    }

    info!(kept, rejected, "thread extraction finished");
}
