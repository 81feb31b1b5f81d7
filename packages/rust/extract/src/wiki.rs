//! Encyclopedia article extraction.
//!
//! Pulls the page title and the readable body out of a MediaWiki-rendered page
//! and writes it as light Markdown: `# Title`, `## Section`, `### Subsection`,
//! paragraphs separated by blank lines. Capture stops at the first footer
//! section (See also, References, ...).

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

use corpusforge_shared::{
    CancellationToken, Stage, Task, TaskSender, TaskStream, recv_task, send_task, task_channel,
};

use crate::cleanup::clean_text;

/// Elements removed from the content region before scanning.
const DENYLIST: &str = ".mw-editsection, #toc, .toc, .infobox, .thumb, .reference, .noprint, \
                        .refbegin, .reflist, script, style, table, .mw-empty-elt";

/// Elements scanned, in document order.
const CONTENT_TAGS: &str = "h2, h3, h4, h5, h6, p, ul, ol, dl, blockquote";

/// Substrings of a heading id that mark a footer section.
const FOOTER_IDS: &[&str] = &[
    "see_also",
    "references",
    "notes",
    "external_links",
    "bibliography",
    "further_reading",
];

/// Letters-only, lowercased heading texts that mark a footer section.
const FOOTER_TITLES: &[&str] = &[
    "seealso",
    "references",
    "notes",
    "externallinks",
    "bibliography",
    "furtherreading",
    "sources",
    "citations",
];

/// Selectors used by every extraction, parsed once per process.
struct ArticleSelectors {
    first_heading: Selector,
    any_h1: Selector,
    parser_output: Selector,
    content_text: Selector,
    headline: Selector,
    junk: Selector,
    content: Selector,
}

impl ArticleSelectors {
    fn get() -> &'static Self {
        static SELECTORS: LazyLock<ArticleSelectors> = LazyLock::new(ArticleSelectors::new);
        &SELECTORS
    }

    fn new() -> Self {
        let parse = |css: &str| Selector::parse(css).expect("valid selector");
        Self {
            first_heading: parse("#firstHeading"),
            any_h1: parse("h1"),
            parser_output: parse(".mw-parser-output"),
            content_text: parse("#mw-content-text"),
            headline: parse(".mw-headline"),
            junk: parse(DENYLIST),
            content: parse(CONTENT_TAGS),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract an article as Markdown-flavoured text. Returns an empty string when
/// the page has neither a title nor any body text.
pub fn extract_article(html: &str) -> String {
    let sel = ArticleSelectors::get();
    let mut doc = Html::parse_document(html);
    let mut out = String::new();

    let title = doc
        .select(&sel.first_heading)
        .next()
        .or_else(|| doc.select(&sel.any_h1).next())
        .map(|el| clean_text(&text_of(el)))
        .unwrap_or_default();
    if !title.is_empty() {
        out.push_str(&format!("# {title}\n\n"));
    }

    let mut regions: Vec<_> = doc.select(&sel.parser_output).map(|el| el.id()).collect();
    if regions.is_empty() {
        regions = doc.select(&sel.content_text).map(|el| el.id()).collect();
    }

    // Detach denylisted nodes from the tree before anything is read.
    let junk: Vec<_> = regions
        .iter()
        .filter_map(|&id| doc.tree.get(id).and_then(ElementRef::wrap))
        .flat_map(|region| region.select(&sel.junk).map(|el| el.id()).collect::<Vec<_>>())
        .collect();
    for id in junk {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }

    let mut visited = HashSet::new();
    'scan: for &region_id in &regions {
        let Some(region) = doc.tree.get(region_id).and_then(ElementRef::wrap) else {
            continue;
        };

        for el in region.select(&sel.content) {
            if !visited.insert(el.id()) {
                continue;
            }

            match el.value().name() {
                "h2" => {
                    if is_footer_heading(el, &sel.headline) {
                        break 'scan;
                    }
                    let text = clean_text(&text_of(el));
                    if !text.is_empty() {
                        out.push_str(&format!("\n\n## {text}\n"));
                    }
                }
                "h3" | "h4" | "h5" | "h6" => {
                    let text = clean_text(&text_of(el));
                    if !text.is_empty() {
                        out.push_str(&format!("\n### {text}\n"));
                    }
                }
                _ => {
                    let text = clean_text(&text_of(el));
                    if !text.is_empty() {
                        out.push_str(&text);
                        out.push_str("\n\n");
                    }
                }
            }
        }
    }

    out.trim().to_string()
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect()
}

fn id_marks_footer(el: Option<ElementRef<'_>>) -> bool {
    let Some(id) = el.and_then(|el| el.value().attr("id")) else {
        return false;
    };
    let id = id.to_lowercase();
    FOOTER_IDS.iter().any(|marker| id.contains(marker))
}

/// A level-2 heading that opens a footer section, judged by its own id, its
/// parent's id, its headline span's id, or its text.
fn is_footer_heading(heading: ElementRef<'_>, headline: &Selector) -> bool {
    if id_marks_footer(Some(heading))
        || id_marks_footer(heading.parent().and_then(ElementRef::wrap))
        || id_marks_footer(heading.select(headline).next())
    {
        return true;
    }

    let letters: String = heading
        .text()
        .flat_map(str::chars)
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect();
    FOOTER_TITLES.contains(&letters.as_str())
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Stage turning fetched encyclopedia pages into article text.
///
/// Pages without content, or whose extraction comes out empty, are dropped.
#[derive(Debug, Clone, Default)]
pub struct WikiExtractor;

impl Stage for WikiExtractor {
    fn name(&self) -> &str {
        "wiki-extract"
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
    let mut extracted: usize = 0;

    while let Some(task) = recv_task(&mut input, cancel).await {
        let Some(html) = task.content.as_deref().filter(|c| !c.is_empty()) else {
            debug!(id = task.id, "no content to extract, dropping");
            continue;
        };

        let article = extract_article(html);
        if article.is_empty() {
            debug!(id = task.id, url = ?task.url, "nothing extracted, dropping");
            continue;
        }

        let out = Task {
            id: task.id,
            url: task.url,
            source: None,
            content: Some(article),
        };
        if !send_task(tx, out, cancel).await {
            info!(extracted, "stopping text extraction");
            return;
        }
        extracted += 1;
    }

    info!(extracted, "text extraction finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{collect, feed, fixture};

    #[test]
    fn title_and_sections_are_rendered() {
        let html = r#"<html><body>
            <h1 id="firstHeading">Rust (programming language)</h1>
            <div class="mw-parser-output">
                <p>Rust is a   general-purpose language.</p>
                <h2>History</h2>
                <p>Started in 2006.</p>
                <h3>Early years</h3>
                <p>Mozilla sponsored it.</p>
                <h4>Deeper</h4>
                <ul><li>one</li><li>two</li></ul>
            </div>
        </body></html>"#;

        let out = extract_article(html);
        assert_eq!(
            out,
            "# Rust (programming language)\n\n\
             Rust is a general-purpose language.\n\n\
             \n\n## History\n\
             Started in 2006.\n\n\
             \n### Early years\n\
             Mozilla sponsored it.\n\n\
             \n### Deeper\n\
             onetwo"
        );
    }

    #[test]
    fn footer_heading_stops_capture() {
        let html = r#"<html><body>
            <h1 id="firstHeading">Example</h1>
            <div class="mw-parser-output">
                <p>Intro text.</p>
                <h2>History</h2>
                <p>History text.</p>
                <h2 id="References">References</h2>
                <p>Reference list text.</p>
                <h3>Later sub-heading</h3>
                <p>Trailing paragraph.</p>
            </div>
        </body></html>"#;

        let out = extract_article(html);
        assert!(out.contains("Intro text."));
        assert!(out.contains("## History"));
        assert!(out.contains("History text."));
        assert!(!out.contains("References"));
        assert!(!out.contains("Reference list text."));
        assert!(!out.contains("Later sub-heading"));
        assert!(!out.contains("Trailing paragraph."));
    }

    #[test]
    fn extraction_is_shareable_across_threads() {
        let html = fixture("html/wiki_article.html");
        let expected = extract_article(&html);

        let outputs: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| extract_article(&html)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(outputs.iter().all(|out| *out == expected));
    }

    #[test]
    fn footer_detected_by_text_parent_or_headline() {
        let by_text = r#"<div class="mw-parser-output"><p>keep</p><h2>Further   reading.</h2><p>drop</p></div>"#;
        let by_parent = r#"<div class="mw-parser-output"><p>keep</p><div id="External_links_block"><h2>Links</h2></div><p>drop</p></div>"#;
        let by_headline = r#"<div class="mw-parser-output"><p>keep</p><h2><span class="mw-headline" id="See_also">More</span></h2><p>drop</p></div>"#;
        let not_footer = r#"<div class="mw-parser-output"><p>keep</p><h2>Sourcing</h2><p>also kept</p></div>"#;

        for html in [by_text, by_parent, by_headline] {
            let out = extract_article(html);
            assert!(out.contains("keep"), "{html}");
            assert!(!out.contains("drop"), "{html}");
        }
        assert!(extract_article(not_footer).contains("also kept"));
    }

    #[test]
    fn denylisted_elements_are_removed() {
        let html = r#"<html><body>
            <h1 id="firstHeading">Clean</h1>
            <div class="mw-parser-output">
                <table class="infobox"><tr><td><p>infobox paragraph</p></td></tr></table>
                <div class="thumb"><p>caption text</p></div>
                <p>Body<sup class="reference">[1]</sup> text.</p>
                <h2>Section<span class="mw-editsection">[edit]</span></h2>
                <p class="mw-empty-elt"></p>
                <script>var x = 1;</script>
            </div>
        </body></html>"#;

        let out = extract_article(html);
        assert!(out.contains("Body text."));
        assert!(out.contains("## Section\n"));
        assert!(!out.contains("[edit]"));
        assert!(!out.contains("[1]"));
        assert!(!out.contains("infobox paragraph"));
        assert!(!out.contains("caption text"));
        assert!(!out.contains("var x"));
    }

    #[test]
    fn falls_back_to_plain_h1_and_content_text() {
        let html = r#"<html><body>
            <h1>Fallback Title</h1>
            <div id="mw-content-text"><p>Fallback body.</p></div>
        </body></html>"#;

        assert_eq!(extract_article(html), "# Fallback Title\n\nFallback body.");
    }

    #[test]
    fn fixture_article_stops_at_see_also() {
        let out = extract_article(&fixture("html/wiki_article.html"));

        assert!(out.starts_with("# Borrow checker\n\n"));
        assert!(out.contains("## Overview"));
        assert!(out.contains("### Lifetimes"));
        assert!(!out.contains("Contents"));
        assert!(!out.contains("See also"));
        assert!(!out.contains("Ownership (computer science)"));
    }

    #[tokio::test]
    async fn stage_drops_empty_pages_and_keeps_ids() {
        let tasks = vec![
            Task {
                id: 4,
                url: Some("https://en.wikipedia.org/wiki/A".into()),
                source: None,
                content: Some(
                    r#"<h1 id="firstHeading">A</h1><div class="mw-parser-output"><p>alpha</p></div>"#
                        .into(),
                ),
            },
            Task::with_url(5, "https://en.wikipedia.org/wiki/B"),
            Task {
                id: 6,
                content: Some("<html><body></body></html>".into()),
                ..Task::default()
            },
        ];

        let out = collect(WikiExtractor.run(Some(feed(tasks)), CancellationToken::new())).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 4);
        assert_eq!(out[0].url.as_deref(), Some("https://en.wikipedia.org/wiki/A"));
        assert_eq!(out[0].content.as_deref(), Some("# A\n\nalpha"));
    }
}
