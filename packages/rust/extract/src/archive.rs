//! Q&A archive linking.
//!
//! A dump file is a flat list of `<row .../>` elements, questions and answers
//! interleaved. One streaming pass classifies every row into two maps keyed by
//! row id: questions that have an accepted answer, and answers that clear the
//! score bar. The join then walks the questions and looks up each accepted
//! answer; questions whose answer is missing or filtered out are dropped.
//!
//! Files are processed one at a time, so peak memory is one file's rows.
//! Pair order within a file follows map iteration and is unspecified.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info, instrument, warn};

use corpusforge_shared::{
    CancellationToken, CorpusError, Result, Stage, Task, TaskSender, TaskStream, recv_task,
    send_task, task_channel,
};

use crate::cleanup::{format_pair, strip_markup};

/// Output ids are `file_id * ARCHIVE_ID_STRIDE + pair_index`. A file with more
/// pairs than this collides with the next file's ids.
pub const ARCHIVE_ID_STRIDE: u64 = 1_000_000;

/// Post type of a question row.
const QUESTION: &str = "1";

/// Post type of an answer row.
const ANSWER: &str = "2";

/// Id of the `index`-th pair extracted from the file with task id `file_id`.
pub fn pair_id(file_id: u64, index: usize) -> u64 {
    file_id * ARCHIVE_ID_STRIDE + index as u64
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// The attributes of one `<row>` that the linker cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveRow {
    pub id: String,
    pub post_type_id: String,
    pub body: String,
    pub title: String,
    pub accepted_answer_id: String,
    pub score: i64,
}

impl ArchiveRow {
    /// Decode a row from its start tag. A missing `Score` is 0; a malformed
    /// attribute or a non-integer `Score` is an error.
    fn from_start(start: &BytesStart<'_>, decoder: Decoder) -> Result<Self> {
        let mut row = Self::default();

        for attr in start.attributes() {
            let attr = attr.map_err(|e| CorpusError::Xml(e.to_string()))?;
            let value = attr
                .decode_and_unescape_value(decoder)
                .map_err(|e| CorpusError::Xml(e.to_string()))?;

            match attr.key.as_ref() {
                b"Id" => row.id = value.into_owned(),
                b"PostTypeId" => row.post_type_id = value.into_owned(),
                b"Body" => row.body = value.into_owned(),
                b"Title" => row.title = value.into_owned(),
                b"AcceptedAnswerId" => row.accepted_answer_id = value.into_owned(),
                b"Score" => {
                    row.score = value
                        .trim()
                        .parse()
                        .map_err(|_| CorpusError::Xml(format!("invalid Score '{value}'")))?;
                }
                _ => {}
            }
        }

        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// The two lookup tables built by one pass over a dump.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    /// Questions with a non-empty accepted answer id, keyed by row id.
    pub questions: HashMap<String, ArchiveRow>,
    /// Bodies of answers scoring at least the minimum, keyed by row id.
    pub answers: HashMap<String, String>,
}

impl ArchiveIndex {
    /// Stream `reader` once, classifying every `row` element.
    ///
    /// A row that fails to decode is skipped. A document-level XML error ends
    /// the pass, keeping whatever was classified before it.
    pub fn scan<R: BufRead>(
        reader: R,
        min_score: i64,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut reader = Reader::from_reader(reader);
        let mut index = Self::default();
        let mut buf = Vec::new();
        let mut skipped: usize = 0;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(start) | Event::Empty(start))
                    if start.local_name().as_ref() == b"row" =>
                {
                    if cancel.is_cancelled() {
                        return Err(CorpusError::Cancelled);
                    }
                    match ArchiveRow::from_start(&start, reader.decoder()) {
                        Ok(row) => index.classify(row, min_score),
                        Err(e) => {
                            debug!(error = %e, "skipping malformed row");
                            skipped += 1;
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        position = reader.buffer_position(),
                        error = %e,
                        "xml decode stopped early"
                    );
                    break;
                }
            }
            buf.clear();
        }

        debug!(
            questions = index.questions.len(),
            answers = index.answers.len(),
            skipped,
            "archive scan complete"
        );
        Ok(index)
    }

    fn classify(&mut self, row: ArchiveRow, min_score: i64) {
        if row.post_type_id == QUESTION && !row.accepted_answer_id.is_empty() {
            self.questions.insert(row.id.clone(), row);
        } else if row.post_type_id == ANSWER && row.score >= min_score {
            self.answers.insert(row.id, row.body);
        }
    }

    /// Join questions to their accepted answers and format each pair.
    pub fn link(&self) -> Vec<String> {
        self.questions
            .values()
            .filter_map(|question| {
                let answer = self.answers.get(&question.accepted_answer_id)?;
                let prompt = strip_markup(&format!("{} {}", question.title, question.body));
                Some(format_pair(&prompt, &strip_markup(answer)))
            })
            .collect()
    }
}

/// Scan and link one dump file.
pub fn link_file(path: &Path, min_score: i64, cancel: &CancellationToken) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| CorpusError::io(path, e))?;
    let index = ArchiveIndex::scan(BufReader::new(file), min_score, cancel)?;
    Ok(index.link())
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Stage turning dump file tasks into Q&A records, one file at a time.
#[derive(Debug, Clone)]
pub struct ArchiveLinker {
    min_score: i64,
}

impl ArchiveLinker {
    /// Keep only answers scoring at least `min_score`.
    pub fn new(min_score: i64) -> Self {
        Self { min_score }
    }
}

impl Stage for ArchiveLinker {
    fn name(&self) -> &str {
        "archive-link"
    }

    fn run(&self, input: Option<TaskStream>, cancel: CancellationToken) -> TaskStream {
        let (tx, rx) = task_channel();
        if let Some(input) = input {
            let min_score = self.min_score;
            tokio::spawn(async move { link_all(input, min_score, &tx, &cancel).await });
        }
        rx
    }
}

#[instrument(skip_all, fields(min_score = min_score))]
async fn link_all(
    mut input: TaskStream,
    min_score: i64,
    tx: &TaskSender,
    cancel: &CancellationToken,
) {
    while let Some(task) = recv_task(&mut input, cancel).await {
        let Some(path) = task.source.clone() else {
            warn!(id = task.id, "task has no source file, skipping");
            continue;
        };
        info!(file = %path.display(), "processing file");

        let scan = {
            let path = path.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || link_file(&path, min_score, &cancel)).await
        };

        let pairs = match scan {
            Ok(Ok(pairs)) => pairs,
            Ok(Err(CorpusError::Cancelled)) => {
                info!("stopping archive linking, pipeline cancelled");
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to process file");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "archive scan task failed");
                continue;
            }
        };

        let total = pairs.len();
        if total as u64 > ARCHIVE_ID_STRIDE {
            warn!(
                file = %path.display(),
                pairs = total,
                stride = ARCHIVE_ID_STRIDE,
                "pair count exceeds id stride, ids will collide with the next file"
            );
        }

        if !emit_pairs(task.id, &path, pairs, tx, cancel).await {
            return;
        }
        info!(file = %path.display(), pairs = total, "finished file");
    }
}

async fn emit_pairs(
    file_id: u64,
    path: &Path,
    pairs: Vec<String>,
    tx: &TaskSender,
    cancel: &CancellationToken,
) -> bool {
    for (index, content) in pairs.into_iter().enumerate() {
        let out = Task {
            id: pair_id(file_id, index),
            url: None,
            source: Some(path.to_path_buf()),
            content: Some(content),
        };
        if !send_task(tx, out, cancel).await {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{collect, feed, fixture};

    fn scan(xml: &str, min_score: i64) -> Vec<String> {
        ArchiveIndex::scan(xml.as_bytes(), min_score, &CancellationToken::new())
            .unwrap()
            .link()
    }

    const ANSWER_BODY: &str = "&lt;p&gt;Use &lt;code&gt;iter()&lt;/code&gt; &amp;amp; map.&lt;/p&gt;";

    #[test]
    fn accepted_answer_is_linked() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<posts>
  <row Id="1" PostTypeId="1" AcceptedAnswerId="2" Score="3" Title="T" Body="B" />
  <row Id="2" PostTypeId="2" Score="5" Body="{ANSWER_BODY}" />
</posts>"#
        );

        let pairs = scan(&xml, 1);
        assert_eq!(pairs, vec!["<user>: T B\n<bot>: Use iter() & map.\n<eos>\n".to_string()]);
    }

    #[test]
    fn low_scoring_answer_is_filtered() {
        let xml = r#"<posts>
  <row Id="1" PostTypeId="1" AcceptedAnswerId="2" Title="T" Body="B" />
  <row Id="2" PostTypeId="2" Score="0" Body="answer" />
</posts>"#;

        assert!(scan(xml, 1).is_empty());
    }

    #[test]
    fn unresolved_answer_is_dropped() {
        let xml = r#"<posts>
  <row Id="1" PostTypeId="1" AcceptedAnswerId="99" Title="T" Body="B" />
  <row Id="2" PostTypeId="2" Score="5" Body="answer" />
</posts>"#;

        assert!(scan(xml, 1).is_empty());
    }

    #[test]
    fn answer_may_precede_question() {
        let xml = r#"<posts>
  <row Id="20" PostTypeId="2" Score="2" Body="first in file" />
  <row Id="10" PostTypeId="1" AcceptedAnswerId="20" Title="Later" Body="question" />
</posts>"#;

        assert_eq!(
            scan(xml, 1),
            vec!["<user>: Later question\n<bot>: first in file\n<eos>\n".to_string()]
        );
    }

    #[test]
    fn classification_predicates() {
        let xml = r#"<posts>
  <row Id="1" PostTypeId="1" Title="no accepted answer" Body="x" />
  <row Id="2" PostTypeId="1" AcceptedAnswerId="3" Title="q" Body="x" />
  <row Id="3" PostTypeId="2" Score="-1" Body="negative" />
  <row Id="4" PostTypeId="2" Body="missing score counts as zero" />
  <row Id="5" PostTypeId="5" Body="tag wiki" />
</posts>"#;

        let index = ArchiveIndex::scan(xml.as_bytes(), 0, &CancellationToken::new()).unwrap();
        assert_eq!(index.questions.keys().collect::<Vec<_>>(), vec!["2"]);
        assert_eq!(index.answers.len(), 1);
        assert_eq!(index.answers["4"], "missing score counts as zero");
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let xml = r#"<posts>
  <row Id="1" PostTypeId="1" AcceptedAnswerId="2" Title="T" Body="B" />
  <row Id="3" PostTypeId="2" Score="lots" Body="bad score" />
  <row Id="2" PostTypeId="2" Score="4" Body="good answer" />
</posts>"#;

        let index = ArchiveIndex::scan(xml.as_bytes(), 1, &CancellationToken::new()).unwrap();
        assert!(!index.answers.contains_key("3"));
        assert_eq!(index.link().len(), 1);
    }

    #[test]
    fn truncated_document_keeps_rows_before_the_error() {
        let xml = r#"<posts>
  <row Id="1" PostTypeId="1" AcceptedAnswerId="2" Title="T" Body="B" />
  <row Id="2" PostTypeId="2" Score="4" Body="kept" />
  <row Id="3" PostTypeId="2" Score="4" Body="never closed"#;

        assert_eq!(scan(xml, 1).len(), 1);
    }

    #[test]
    fn cancelled_scan_stops() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let xml = r#"<posts><row Id="1" PostTypeId="2" Score="1" Body="x" /></posts>"#;

        let err = ArchiveIndex::scan(xml.as_bytes(), 1, &cancel).unwrap_err();
        assert!(matches!(err, CorpusError::Cancelled));
    }

    #[test]
    fn pair_ids_at_the_stride_boundary() {
        assert_eq!(pair_id(0, 0), 0);
        assert_eq!(pair_id(0, 999_999), 999_999);
        assert_eq!(pair_id(1, 0), 1_000_000);
        assert_eq!(pair_id(3, 17), 3_000_017);
        // One pair past the stride lands on the next file's first id.
        assert_eq!(pair_id(0, 1_000_000), pair_id(1, 0));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = link_file(Path::new("/no/such/dump.xml"), 1, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, CorpusError::Io { .. }));
    }

    #[tokio::test]
    async fn stage_links_files_and_synthesises_ids() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.xml");
        let second = dir.path().join("b.xml");
        std::fs::write(&first, fixture("xml/posts.xml")).unwrap();
        std::fs::write(
            &second,
            r#"<posts><row Id="1" PostTypeId="1" AcceptedAnswerId="2" Title="Solo" Body="q" /><row Id="2" PostTypeId="2" Score="9" Body="a" /></posts>"#,
        )
        .unwrap();

        let tasks = vec![
            Task::with_source(0, &first),
            Task::with_source(1, dir.path().join("missing.xml")),
            Task::with_source(2, &second),
        ];
        let out = collect(ArchiveLinker::new(1).run(Some(feed(tasks)), CancellationToken::new()))
            .await;

        let mut first_ids: Vec<u64> = out
            .iter()
            .filter(|t| t.source.as_deref() == Some(first.as_path()))
            .map(|t| t.id)
            .collect();
        first_ids.sort_unstable();
        assert_eq!(first_ids, vec![0, 1]);

        let solo: Vec<&Task> = out
            .iter()
            .filter(|t| t.source.as_deref() == Some(second.as_path()))
            .collect();
        assert_eq!(solo.len(), 1);
        assert_eq!(solo[0].id, 2_000_000);
        assert_eq!(solo[0].content_str(), "<user>: Solo q\n<bot>: a\n<eos>\n");
    }
}
