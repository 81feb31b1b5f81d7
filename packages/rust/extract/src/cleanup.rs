//! Text normalisation applied to every extracted block.
//!
//! Each pass is a function `&str -> String`; patterns are compiled once per
//! process.

use std::sync::LazyLock;

use regex::Regex;

/// Collapse runs of spaces/tabs to one space and runs of three or more
/// newlines to exactly two, then trim.
///
/// Idempotent: `clean_text(&clean_text(s)) == clean_text(s)`.
pub fn clean_text(input: &str) -> String {
    static HORIZONTAL_WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
    static MULTI_NEWLINE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let spaced = HORIZONTAL_WS_RE.replace_all(input, " ");
    MULTI_NEWLINE_RE
        .replace_all(&spaced, "\n\n")
        .trim()
        .to_string()
}

/// Decode HTML entities, replace every `<...>` tag with a space, then
/// [`clean_text`].
pub fn strip_markup(input: &str) -> String {
    static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

    let decoded = html_escape::decode_html_entities(input);
    let untagged = TAG_RE.replace_all(&decoded, " ");
    clean_text(&untagged)
}

/// Render one question/answer pair as a training record.
pub fn format_pair(question: &str, answer: &str) -> String {
    format!("<user>: {question}\n<bot>: {answer}\n<eos>\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_horizontal_whitespace() {
        assert_eq!(clean_text("a  \t b\t\tc"), "a b c");
    }

    #[test]
    fn clean_text_collapses_blank_line_runs() {
        assert_eq!(clean_text("one\n\n\n\n\ntwo\n\nthree"), "one\n\ntwo\n\nthree");
    }

    #[test]
    fn clean_text_trims() {
        assert_eq!(clean_text("\n\n  padded  \n"), "padded");
    }

    #[test]
    fn clean_text_is_idempotent() {
        let samples = [
            "  lots   of\t\tspace \n\n\n\n and lines  ",
            "a \n \n\n\n b",
            "\t\n\n\n\t",
            "already clean\n\ntext",
            "",
        ];
        for s in samples {
            let once = clean_text(s);
            assert_eq!(clean_text(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn strip_markup_decodes_then_strips() {
        let html = "<p>Use <code>Vec&lt;T&gt;</code> &amp; friends.</p>";
        // `&lt;T&gt;` decodes into a tag-shaped run and is stripped too.
        assert_eq!(strip_markup(html), "Use Vec & friends.");
    }

    #[test]
    fn strip_markup_keeps_paragraph_breaks() {
        let html = "<p>First</p>\n\n\n\n<p>Second</p>";
        assert_eq!(strip_markup(html), "First \n\n Second");
    }

    #[test]
    fn format_pair_layout() {
        assert_eq!(format_pair("Q?", "A."), "<user>: Q?\n<bot>: A.\n<eos>\n");
    }
}
