//! Rendering: normalised tree → Markdown text.
//!
//! The renderer walks the tree bottom-up. Children are rendered first and
//! their concatenated output handed to the first [`Rule`] whose filter accepts
//! the element. Rules are an ordered list rather than a `match` so callers can
//! slot their own in ahead of the built-ins ([`Renderer::with_rule`]); the list
//! always ends in a catch-all that emits the children's text unchanged.
//!
//! Table rules lean on the guarantees of [`super::tables`]: every row has the
//! same number of cells, no spans remain, and a header row exists. The table
//! rule still re-checks its own output for a separator line.

use crate::dom::{self, Element, Node};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\n[\s\n]*").unwrap());
static RE_EXCESS_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

const BLOCK_CONTAINERS: &[&str] = &[
    "div", "section", "article", "main", "header", "footer", "aside", "nav", "figure",
    "figcaption", "address", "center", "dl", "dt", "dd", "body", "form", "fieldset",
];

const SILENT_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "title", "meta", "link", "input", "button",
    "colgroup", "col",
];

/// Where an element sits while it is being rendered.
pub struct Context<'a> {
    /// Root first, parent last.
    ancestors: &'a [&'a Element],
    /// Position among the parent's element children.
    index: usize,
}

impl<'a> Context<'a> {
    pub fn parent(&self) -> Option<&'a Element> {
        self.ancestors.last().copied()
    }

    pub fn grandparent(&self) -> Option<&'a Element> {
        self.ancestors.iter().rev().nth(1).copied()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_ancestor(&self, tag: &str) -> bool {
        self.ancestors.iter().any(|a| a.is(tag))
    }
}

pub type Filter = fn(&Element, &Context<'_>) -> bool;
pub type RenderFn = fn(&str, &Element, &Context<'_>) -> String;

/// A predicate plus the function that renders what it matches.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub filter: Filter,
    /// Receives the already-rendered children.
    pub render: RenderFn,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

/// Ordered rule list; first match wins.
#[derive(Debug, Clone)]
pub struct Renderer {
    rules: Vec<Rule>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let rules = vec![
            Rule { name: "silent", filter: |e, _| e.is_any(SILENT_TAGS), render: |_, _, _| String::new() },
            Rule { name: "paragraph", filter: |e, _| e.is("p"), render: |c, _, _| block(c) },
            Rule { name: "heading", filter: |e, _| heading_level(e).is_some(), render: render_heading },
            Rule { name: "line-break", filter: |e, _| e.is("br"), render: |_, _, _| "\n".to_string() },
            Rule { name: "rule", filter: |e, _| e.is("hr"), render: |_, _, _| "\n\n---\n\n".to_string() },
            Rule { name: "code-block", filter: |e, _| e.is("pre"), render: render_code_block },
            Rule { name: "inline-code", filter: |e, _| e.is_any(&["code", "kbd", "samp", "tt"]), render: render_inline_code },
            Rule { name: "blockquote", filter: |e, _| e.is("blockquote"), render: render_blockquote },
            Rule { name: "details", filter: |e, _| e.is("details"), render: render_details },
            Rule { name: "summary", filter: |e, ctx| e.is("summary") && ctx.parent().is_some_and(|p| p.is("details")), render: |_, _, _| String::new() },
            Rule { name: "list", filter: |e, _| e.is_any(&["ul", "ol"]), render: render_list },
            Rule { name: "list-item", filter: |e, _| e.is("li"), render: render_list_item },
            Rule { name: "table-cell", filter: |e, _| e.is_any(&["th", "td"]), render: render_cell },
            Rule { name: "table-row", filter: |e, _| e.is("tr"), render: render_row },
            Rule { name: "table-section", filter: |e, _| e.is_any(&["thead", "tbody", "tfoot"]), render: |c, _, _| c.to_string() },
            Rule { name: "table-caption", filter: |e, _| e.is("caption"), render: |_, _, _| String::new() },
            Rule { name: "table", filter: |e, _| e.is("table"), render: render_table },
            Rule { name: "strong", filter: |e, _| e.is_any(&["strong", "b"]), render: |c, _, _| wrap_inline(c, "**") },
            Rule { name: "emphasis", filter: |e, _| e.is_any(&["em", "i", "cite"]), render: |c, _, _| wrap_inline(c, "_") },
            Rule { name: "strikethrough", filter: |e, _| e.is_any(&["del", "s", "strike"]), render: |c, _, _| wrap_inline(c, "~~") },
            Rule { name: "link", filter: |e, _| e.is("a"), render: render_link },
            Rule { name: "image", filter: |e, _| e.is("img"), render: render_image },
            Rule { name: "block-container", filter: |e, _| e.is_any(BLOCK_CONTAINERS), render: |c, _, _| block(c) },
            Rule { name: "fallback", filter: |_, _| true, render: |c, _, _| c.to_string() },
        ];
        Self { rules }
    }

    /// Insert `rule` ahead of the catch-all.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        let at = self.rules.len().saturating_sub(1);
        self.rules.insert(at, rule);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Render `root` and everything below it.
    pub fn render(&self, root: &Element) -> String {
        let mut ancestors = Vec::new();
        self.render_element(root, &mut ancestors, 0)
    }

    fn render_element<'a>(&self, el: &'a Element, ancestors: &mut Vec<&'a Element>, index: usize) -> String {
        ancestors.push(el);
        let content = self.render_children(el, ancestors);
        ancestors.pop();

        let ctx = Context {
            ancestors: ancestors.as_slice(),
            index,
        };
        match self.rules.iter().find(|r| (r.filter)(el, &ctx)) {
            Some(rule) => (rule.render)(&content, el, &ctx),
            None => content,
        }
    }

    fn render_children<'a>(&self, el: &'a Element, ancestors: &mut Vec<&'a Element>) -> String {
        let mut out = String::new();
        let mut element_index = 0usize;
        for child in &el.children {
            let piece = match child {
                Node::Text(t) => dom::collapse_whitespace(t),
                Node::Element(e) => {
                    let s = self.render_element(e, ancestors, element_index);
                    element_index += 1;
                    s
                }
            };
            // Adjacent whitespace collapses across node boundaries.
            let piece = if out.is_empty() || out.ends_with([' ', '\n']) {
                piece.trim_start_matches(' ')
            } else {
                piece.as_str()
            };
            join(&mut out, piece);
        }
        out
    }
}

/// Append `piece`, merging the newlines at the seam into at most one blank line.
fn join(out: &mut String, piece: &str) {
    let leading = piece.len() - piece.trim_start_matches('\n').len();
    if leading == 0 {
        out.push_str(piece);
        return;
    }
    let kept = out.trim_end_matches([' ', '\n']).len();
    let trailing = out[kept..].matches('\n').count();
    out.truncate(kept);
    if !out.is_empty() {
        out.push_str(&"\n".repeat(leading.max(trailing).min(2)));
    }
    out.push_str(&piece[leading..]);
}

/// Render with the default rule set.
pub fn render(root: &Element) -> String {
    Renderer::new().render(root)
}

// ── helpers ──────────────────────────────────────────────────────────────

fn block(content: &str) -> String {
    let trimmed = content.trim_matches(|c| c == '\n' || c == ' ');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n\n{trimmed}\n\n")
    }
}

/// `marker` around the content, keeping surrounding whitespace outside.
fn wrap_inline(content: &str, marker: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return content.to_string();
    }
    let lead = if content.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if content.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{lead}{marker}{trimmed}{marker}{trail}")
}

fn heading_level(e: &Element) -> Option<usize> {
    match e.tag.as_str() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn render_heading(content: &str, el: &Element, _: &Context<'_>) -> String {
    let level = heading_level(el).unwrap_or(1);
    let text = RE_NEWLINES.replace_all(content.trim(), " ");
    if text.is_empty() {
        return String::new();
    }
    format!("\n\n{} {}\n\n", "#".repeat(level), text)
}

fn code_language(el: &Element) -> String {
    let from = |e: &Element| {
        e.classes()
            .find_map(|c| c.strip_prefix("language-"))
            .map(str::to_string)
    };
    from(el)
        .or_else(|| el.element_children().find_map(from))
        .unwrap_or_default()
}

fn render_code_block(_: &str, el: &Element, _: &Context<'_>) -> String {
    let code = el.text_content();
    let code = code.trim_matches('\n');
    let mut fence = "```".to_string();
    while code.contains(&fence) {
        fence.push('`');
    }
    format!("\n\n{fence}{}\n{code}\n{fence}\n\n", code_language(el))
}

fn render_inline_code(_: &str, el: &Element, ctx: &Context<'_>) -> String {
    if ctx.parent().is_some_and(|p| p.is("pre")) {
        return el.text_content();
    }
    let code = dom::collapse_whitespace(&el.text_content());
    if code.trim().is_empty() {
        return code;
    }
    if code.contains('`') {
        format!("`` {code} ``")
    } else {
        format!("`{code}`")
    }
}

fn render_blockquote(content: &str, _: &Element, _: &Context<'_>) -> String {
    let body = RE_EXCESS_BLANK.replace_all(content.trim_matches(|c| c == '\n' || c == ' '), "\n\n");
    if body.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = body
        .lines()
        .map(|l| if l.trim().is_empty() { ">".to_string() } else { format!("> {l}") })
        .collect();
    format!("\n\n{}\n\n", quoted.join("\n"))
}

fn render_details(content: &str, el: &Element, _: &Context<'_>) -> String {
    let summary = el
        .element_children()
        .find(|c| c.is("summary"))
        .map(|s| escape_html(&s.normalized_text()))
        .unwrap_or_default();
    let body = content.trim_matches(|c| c == '\n' || c == ' ');
    format!("\n\n<details>\n<summary>{summary}</summary>\n\n{body}\n\n</details>\n\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn render_list(content: &str, _: &Element, ctx: &Context<'_>) -> String {
    if ctx.parent().is_some_and(|p| p.is("li")) {
        format!("\n{}\n", content.trim_end())
    } else {
        block(content)
    }
}

/// Digits too large for `u64` saturate.
fn list_start(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(raw.parse().unwrap_or(u64::MAX))
}

fn render_list_item(content: &str, el: &Element, ctx: &Context<'_>) -> String {
    let prefix = match el.attr("data-task-checked") {
        Some("true") => "- [x] ".to_string(),
        Some(_) => "- [ ] ".to_string(),
        None => match ctx.parent() {
            Some(list) if list.is("ol") => {
                let start = list.attr("start").and_then(list_start).unwrap_or(1);
                format!("{}. ", start.saturating_add(ctx.index() as u64))
            }
            _ => "- ".to_string(),
        },
    };
    let body = RE_EXCESS_BLANK.replace_all(content.trim_matches(|c| c == '\n' || c == ' '), "\n\n");
    let indent = " ".repeat(prefix.chars().count().min(4));
    let indented: Vec<String> = body
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect();
    format!("{prefix}{}\n", indented.join("\n"))
}

fn render_link(content: &str, el: &Element, _: &Context<'_>) -> String {
    let text = content.trim();
    let Some(href) = el.attr_nonempty("href") else {
        return content.to_string();
    };
    if text.is_empty() {
        return String::new();
    }
    format!("[{}]({})", text, href.replace(' ', "%20"))
}

fn render_image(_: &str, el: &Element, _: &Context<'_>) -> String {
    let Some(src) = el.attr_nonempty("src") else {
        return String::new();
    };
    let alt = el
        .attr("alt")
        .or_else(|| el.attr("title"))
        .map(dom::collapse_whitespace)
        .unwrap_or_default();
    format!("![{}]({})", alt.trim().replace(['[', ']'], ""), src.replace(' ', "%20"))
}

// ── tables ───────────────────────────────────────────────────────────────

fn render_cell(content: &str, _: &Element, ctx: &Context<'_>) -> String {
    let cleaned = RE_NEWLINES
        .replace_all(content.trim(), "<br>")
        .replace('|', "\\|");
    let prefix = if ctx.index() == 0 { "| " } else { " " };
    format!("{prefix}{cleaned} |")
}

fn is_heading_row(row: &Element, ctx: &Context<'_>) -> bool {
    let Some(parent) = ctx.parent() else {
        return false;
    };
    if parent.is("thead") {
        return true;
    }
    let all_th = row.element_children().count() > 0 && row.element_children().all(|c| c.is("th"));
    if ctx.index() != 0 || !all_th {
        return false;
    }
    if parent.is("table") {
        return true;
    }
    parent.is("tbody")
        && ctx.grandparent().is_some_and(|table| {
            !table.element_children().any(|s| s.is("thead"))
                && table
                    .element_children()
                    .find(|s| s.is("tbody"))
                    .is_some_and(|first| std::ptr::eq(first, parent))
        })
}

fn alignment_marker(cell: &Element) -> &'static str {
    let align = cell
        .attr("align")
        .map(|a| a.trim().to_ascii_lowercase())
        .or_else(|| cell.style_value("text-align"));
    match align.as_deref() {
        Some("left") => ":--",
        Some("right") => "--:",
        Some("center") => ":-:",
        _ => "---",
    }
}

fn render_row(content: &str, el: &Element, ctx: &Context<'_>) -> String {
    if content.trim().is_empty() {
        return String::new();
    }
    let mut out = format!("\n{content}");
    if is_heading_row(el, ctx) {
        let markers: Vec<&str> = el.element_children().map(alignment_marker).collect();
        out.push_str(&format!("\n| {} |", markers.join(" | ")));
    }
    out
}

/// A GFM delimiter row: every cell is `---`, `:--`, `--:` or longer.
fn is_separator_line(line: &str) -> bool {
    let t = line.trim();
    let Some(inner) = t.strip_prefix('|').and_then(|r| r.strip_suffix('|')) else {
        return false;
    };
    inner.split('|').all(|cell| {
        let cell = cell.trim();
        let body = cell.strip_prefix(':').unwrap_or(cell);
        let body = body.strip_suffix(':').unwrap_or(body);
        cell.len() >= 3 && !body.is_empty() && body.chars().all(|c| c == '-')
    })
}

/// Unescaped pipes in a rendered row, minus one.
fn column_count(line: &str) -> usize {
    let pipes = line.matches('|').count() - line.matches("\\|").count();
    pipes.saturating_sub(1).max(1)
}

fn render_table(content: &str, el: &Element, _: &Context<'_>) -> String {
    let mut lines: Vec<String> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    // A heading row always renders first, its delimiter right below it.
    if !lines.get(1).is_some_and(|l| is_separator_line(l)) {
        let cols = column_count(&lines[0]);
        lines.insert(1, format!("| {} |", vec!["---"; cols].join(" | ")));
    }

    let caption = el
        .element_children()
        .find(|c| c.is("caption"))
        .map(Element::normalized_text)
        .filter(|c| !c.is_empty())
        .map(|c| format!("_{c}_\n\n"))
        .unwrap_or_default();
    format!("\n\n{caption}{}\n\n", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tables::normalize_tables;
    use scraper::{Html, Selector};

    fn parse(html: &str) -> Element {
        let doc = Html::parse_fragment(&format!("<div id=\"root\">{html}</div>"));
        let sel = Selector::parse("#root").unwrap();
        dom::from_scraper(doc.select(&sel).next().unwrap())
    }

    fn md(html: &str) -> String {
        render(&parse(html)).trim().to_string()
    }

    #[test]
    fn inline_formatting() {
        assert_eq!(md("<p>a <strong>b</strong> <em>c </em>d <del>e</del></p>"), "a **b** _c_ d ~~e~~");
    }

    #[test]
    fn headings_and_paragraphs() {
        assert_eq!(md("<h2>Title</h2><p>one</p><p>two</p>"), "## Title\n\none\n\ntwo");
    }

    #[test]
    fn links_and_images() {
        assert_eq!(
            md(r#"<p><a href="https://x.org/a b">see</a> <img alt="pic" src="https://x.org/i.png"></p>"#),
            "[see](https://x.org/a%20b) ![pic](https://x.org/i.png)"
        );
        assert_eq!(md("<p><a>plain</a></p>"), "plain");
    }

    #[test]
    fn code_block_with_language() {
        let out = md(r#"<pre><code class="language-rust">fn main() {
    println!("hi");
}</code></pre>"#);
        assert_eq!(out, "```rust\nfn main() {\n    println!(\"hi\");\n}\n```");
    }

    #[test]
    fn inline_code_with_backtick() {
        assert_eq!(md("<p><code>a`b</code></p>"), "`` a`b ``");
    }

    #[test]
    fn lists_nested_and_ordered() {
        let out = md("<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul><ol start=\"3\"><li>x</li><li>y</li></ol>");
        assert_eq!(out, "- a\n  - b\n- c\n\n3. x\n4. y");
    }

    #[test]
    fn huge_list_start_saturates() {
        let out = md(r#"<ol start="18446744073709551615"><li>a</li><li>b</li></ol>"#);
        assert_eq!(out, "18446744073709551615. a\n18446744073709551615. b");
        let out = md(r#"<ol start="99999999999999999999999"><li>a</li></ol>"#);
        assert_eq!(out, "18446744073709551615. a");
        assert_eq!(md(r#"<ol start="-2"><li>a</li></ol>"#), "1. a");
    }

    #[test]
    fn task_items() {
        let out = md(r#"<ul><li data-task-checked="true">Ship it</li><li data-task-checked="false">Later</li></ul>"#);
        assert_eq!(out, "- [x] Ship it\n- [ ] Later");
    }

    #[test]
    fn blockquote_prefixes_every_line() {
        assert_eq!(
            md("<blockquote><p><strong>📝 Note:</strong></p><p>body</p></blockquote>"),
            "> **📝 Note:**\n>\n> body"
        );
    }

    #[test]
    fn details_keep_summary() {
        let out = md("<details><summary>More</summary><p>hidden</p></details>");
        assert_eq!(out, "<details>\n<summary>More</summary>\n\nhidden\n\n</details>");
    }

    #[test]
    fn details_summary_is_escaped() {
        let out = md("<details><summary>a &lt; b &amp; &lt;c&gt;</summary><p>x</p></details>");
        assert!(out.contains("<summary>a &lt; b &amp; &lt;c&gt;</summary>"), "{out}");
    }

    #[test]
    fn unknown_element_renders_inner_text() {
        assert_eq!(md("<p><x-widget>just text</x-widget></p>"), "just text");
    }

    #[test]
    fn table_with_header_and_alignment() {
        let mut root = parse(
            r#"<table><thead><tr><th>Name</th><th align="right">Age</th></tr></thead>
               <tbody><tr><td>Ada|L</td><td>36</td></tr></tbody></table>"#,
        );
        normalize_tables(&mut root);
        assert_eq!(
            render(&root).trim(),
            "| Name | Age |\n| --- | --: |\n| Ada\\|L | 36 |"
        );
    }

    #[test]
    fn table_without_header_gets_separator() {
        let root = parse("<table><tbody><tr><td>a</td><td>b</td></tr><tr><td>c</td><td>d</td></tr></tbody></table>");
        assert_eq!(render(&root).trim(), "| a | b |\n| --- | --- |\n| c | d |");
    }

    #[test]
    fn dash_only_row_is_not_a_delimiter() {
        let root = parse("<table><tbody><tr><td>-</td><td>-</td></tr><tr><td>1</td><td>2</td></tr></tbody></table>");
        assert_eq!(render(&root).trim(), "| - | - |\n| --- | --- |\n| 1 | 2 |");
    }

    #[test]
    fn late_header_row_still_gets_leading_delimiter() {
        let mut root = parse(
            "<table><tr><td>-</td><td>-</td></tr><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table>",
        );
        normalize_tables(&mut root);
        let out = render(&root);
        let lines: Vec<&str> = out.trim().lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "| - | - |");
        assert_eq!(lines[1], "| --- | --- |");
        assert_eq!(lines.iter().filter(|l| is_separator_line(l)).count(), 1);
    }

    #[test]
    fn delimiter_cells_need_three_characters() {
        assert!(is_separator_line("| --- | :-: | --: | :-- |"));
        assert!(is_separator_line("| ----- |"));
        assert!(!is_separator_line("| - | - |"));
        assert!(!is_separator_line("| -- | x |"));
        assert!(!is_separator_line("--- | ---"));
    }

    #[test]
    fn multi_line_cell_uses_br() {
        let root = parse("<table><tbody><tr><th>h</th></tr><tr><td>one<br>two</td></tr></tbody></table>");
        assert_eq!(render(&root).trim(), "| h |\n| --- |\n| one<br>two |");
    }

    #[test]
    fn caption_is_italic_line() {
        let root = parse("<table><caption>Team</caption><tbody><tr><th>h</th></tr></tbody></table>");
        assert_eq!(render(&root).trim(), "_Team_\n\n| h |\n| --- |");
    }

    #[test]
    fn custom_rule_runs_before_fallback() {
        let renderer = Renderer::new().with_rule(Rule {
            name: "mark",
            filter: |e, _| e.is("mark"),
            render: |c, _, _| format!("=={c}=="),
        });
        assert_eq!(renderer.rules().last().unwrap().name, "fallback");
        let out = renderer.render(&parse("<p><mark>hi</mark></p>"));
        assert_eq!(out.trim(), "==hi==");
    }
}
