use std::time::Duration;

use similar::{ChangeTag, TextDiff};

/// Markup around text only present in the expected output
pub const DELETE_START: &str = "\x1b[31m";
/// Markup around text only present in the actual output
pub const INSERT_START: &str = "\x1b[32m";
pub const MARKUP_END: &str = "\x1b[0m";

/// Upper bound on diff computation for very large outputs
const DIFF_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of comparing one expected output against an actual one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffVerdict {
    NoDiff,
    Mismatch(String),
}

impl DiffVerdict {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, DiffVerdict::Mismatch(_))
    }
}

/// Renders a character-level diff from `expected` to `actual`
///
/// Equal runs are emitted as-is, so the rendering of two identical texts is
/// the text itself. Differing runs are wrapped in ANSI colors, which keeps
/// reports readable with `cat`.
pub fn render(expected: &str, actual: &str) -> String {
    let diff = TextDiff::configure()
        .timeout(DIFF_TIMEOUT)
        .diff_chars(expected, actual);

    let mut rendered = String::with_capacity(expected.len().max(actual.len()));
    let mut current = ChangeTag::Equal;

    for change in diff.iter_all_changes() {
        let tag = change.tag();
        if tag != current {
            if current != ChangeTag::Equal {
                rendered.push_str(MARKUP_END);
            }
            match tag {
                ChangeTag::Delete => rendered.push_str(DELETE_START),
                ChangeTag::Insert => rendered.push_str(INSERT_START),
                ChangeTag::Equal => {}
            }
            current = tag;
        }
        rendered.push_str(change.value());
    }
    if current != ChangeTag::Equal {
        rendered.push_str(MARKUP_END);
    }

    rendered
}

/// Classifies `actual` against `expected`
///
/// Carriage returns are stripped from `expected` first. The pair counts as
/// "no diff" only when the rendering is byte-identical to the expected text;
/// the actual text itself is never compared directly.
pub fn classify(expected: &str, actual: &str) -> DiffVerdict {
    let expected = expected.replace('\r', "");
    let rendered = render(&expected, actual);
    if rendered == expected {
        DiffVerdict::NoDiff
    } else {
        DiffVerdict::Mismatch(rendered)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_identical_text_has_no_diff() {
        let text = "Hello\nWorld\n";
        assert_eq!(render(text, text), text);
        assert_eq!(classify(text, text), DiffVerdict::NoDiff);
        assert_eq!(classify("", ""), DiffVerdict::NoDiff);
    }

    #[test]
    fn test_carriage_returns_in_expected_are_ignored() {
        assert_eq!(classify("1\r\n2\r\n", "1\n2\n"), DiffVerdict::NoDiff);
    }

    #[test]
    fn test_insertions_and_deletions_are_marked() {
        assert_eq!(render("abc", "abcd"), "abc\x1b[32md\x1b[0m");
        assert_eq!(render("abcd", "abc"), "abc\x1b[31md\x1b[0m");
        assert_eq!(render("", "x"), "\x1b[32mx\x1b[0m");
    }

    #[test]
    fn test_mismatch_carries_rendering() {
        let verdict = classify("42\n", "41\n");
        assert!(verdict.is_mismatch());
        let DiffVerdict::Mismatch(rendered) = verdict else {
            unreachable!();
        };
        assert!(rendered.starts_with("4"));
        assert!(rendered.contains(DELETE_START));
        assert!(rendered.contains(INSERT_START));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn test_missing_trailing_newline_is_a_mismatch() {
        assert!(classify("done\n", "done").is_mismatch());
    }
}
