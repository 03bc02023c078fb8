//! Post-processing: deterministic cleanup of rendered Markdown.
//!
//! The renderer works node by node and cannot see the seams between what
//! it emits. These passes tidy the assembled text: line endings, trailing
//! whitespace, runs of blank lines, the extra spaces status badges leave
//! behind, and any raw table markup a rule failed to consume.
//!
//! Each rule is a pure `&str → String` function; none of them change
//! content inside fenced code blocks except for whitespace at line ends.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to the rendered Markdown.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 3. Strip raw table tags left outside code fences
/// 4. Collapse multi-space runs around status badges
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. Ensure the file ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_raw_table_tags(&s);
    let s = collapse_badge_spacing(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Strip raw table tags ─────────────────────────────────────────────

static RE_TABLE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:table|thead|tbody|tfoot|tr|td|th|caption|colgroup|col)(?:\s[^>]*)?/?>")
        .unwrap()
});

/// Lines inside ``` / ~~~ fences are left alone.
fn strip_raw_table_tags(input: &str) -> String {
    map_outside_fences(input, |line| RE_TABLE_TAG.replace_all(line, "").into_owned())
}

// ── Rule 4: Collapse spacing around status badges ────────────────────────────

static RE_SPACE_BEFORE_BADGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S)[ \t]{2,}(`[^`\n]+`)").unwrap());
static RE_SPACE_AFTER_BADGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(`[^`\n]+`)[ \t]{2,}(\S)").unwrap());

fn collapse_badge_spacing(input: &str) -> String {
    map_outside_fences(input, |line| {
        let line = RE_SPACE_BEFORE_BADGE.replace_all(line, "$1 $2");
        RE_SPACE_AFTER_BADGE.replace_all(&line, "$1 $2").into_owned()
    })
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 7: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Fence tracking ───────────────────────────────────────────────────────────

fn fence_marker(line: &str) -> Option<&str> {
    let t = line.trim_start();
    let ch = t.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = t.chars().take_while(|c| *c == ch).count();
    (len >= 3).then(|| &t[..len])
}

/// Apply `f` to every line not inside a fenced code block.
fn map_outside_fences(input: &str, f: impl Fn(&str) -> String) -> String {
    let mut open: Option<String> = None;
    let mut out = Vec::new();
    for line in input.split('\n') {
        match (&open, fence_marker(line)) {
            (None, Some(marker)) => {
                open = Some(marker.to_string());
                out.push(line.to_string());
            }
            (Some(current), Some(marker))
                if marker.starts_with(current.as_str()) && line.trim().len() == marker.len() =>
            {
                open = None;
                out.push(line.to_string());
            }
            (Some(_), _) => out.push(line.to_string()),
            (None, None) => out.push(f(line)),
        }
    }
    out.join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(
            trim_trailing_whitespace("  hello   \nworld  "),
            "  hello\nworld"
        );
    }

    #[test]
    fn test_collapse_blank_lines() {
        let input = "a\n\n\n\n\n\nb";
        assert_eq!(collapse_blank_lines(input), "a\n\n\nb");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_strip_raw_table_tags() {
        let input = "<table><tr><td>x</td></tr></table>\n```html\n<td>kept</td>\n```";
        assert_eq!(strip_raw_table_tags(input), "x\n```html\n<td>kept</td>\n```");
    }

    #[test]
    fn test_badge_spacing() {
        assert_eq!(
            collapse_badge_spacing("state:   `DONE`   next"),
            "state: `DONE` next"
        );
        assert_eq!(collapse_badge_spacing("    indented `code`"), "    indented `code`");
    }

    #[test]
    fn test_fence_marker() {
        assert_eq!(fence_marker("```rust"), Some("```"));
        assert_eq!(fence_marker("  ~~~~"), Some("~~~~"));
        assert_eq!(fence_marker("``x"), None);
    }

    #[test]
    fn test_longer_fence_needs_matching_close() {
        let input = "````\n```\n<tr>\n````\n<tr>";
        assert_eq!(strip_raw_table_tags(input), "````\n```\n<tr>\n````\n");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "# Title\r\n\r\nSome text   \n\n\n\n\n\n## Section\u{200B}\n\n| A | B |\n| --- | --- |\n";
        let result = clean_markdown(input);
        assert!(result.starts_with("# Title"));
        assert!(result.ends_with("| --- | --- |\n"));
        assert!(!result.contains("\n\n\n\n"));
        assert!(!result.contains('\u{200B}'));
    }
}
