//! Macro normalisation: rewrite platform widgets into plain HTML.
//!
//! Wiki pages carry their rich content (panels, code macros, status
//! lozenges, task lists, …) as nested `div`/`span` soup with magic classes
//! and data attributes. Each sub-pass below finds one family of widgets and
//! replaces it with the canonical HTML the renderer knows how to print.
//!
//! Passes run in a fixed order. Noise goes first so nothing downstream
//! wastes time on it; tables and images go last so panels, code and tasks
//! sitting inside table cells are already canonical when cells are
//! linearised. Every pass is idempotent and a no-op when nothing matches.

use crate::dom::{self, Element, Node, Visit};
use crate::output::ImageDescriptor;
use crate::pipeline::{images, tables};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

const NOISE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

const NOISE_CLASSES: &[&str] = &[
    "toc-macro",
    "client-side-toc-macro",
    "page-break",
    "comment-container",
    "comments-section",
    "like-button-container",
    "likes-section",
    "edit-button",
    "page-metadata-modification-info",
];

const NOISE_MACROS: &[&str] = &["toc", "pagebreak", "page-break", "recently-updated", "livesearch"];

const NOISE_IDS: &[&str] = &["comments-section", "likes-and-labels-container", "page-comments"];

/// Legacy information-macro classes, checked first.
const PANEL_CLASS_LABELS: &[(&str, &str)] = &[
    ("confluence-information-macro-information", "Info"),
    ("confluence-information-macro-note", "Note"),
    ("confluence-information-macro-warning", "Warning"),
    ("confluence-information-macro-tip", "Tip"),
    ("confluence-information-macro-success", "Success"),
];

const PANEL_MACRO_LABELS: &[(&str, &str)] = &[
    ("info", "Info"),
    ("note", "Note"),
    ("warning", "Warning"),
    ("tip", "Tip"),
    ("success", "Success"),
];

const PANEL_EMOJI: &[(&str, &str)] = &[
    ("Info", "ℹ️"),
    ("Note", "📝"),
    ("Warning", "⚠️"),
    ("Tip", "💡"),
    ("Success", "✅"),
    ("Error", "❌"),
];

const DEFAULT_PANEL_EMOJI: &str = "ℹ️";

const PANEL_BODY_CLASSES: &[&str] = &[
    "confluence-information-macro-body",
    "panelContent",
    "ak-editor-panel__content",
];

const PANEL_CHROME_CLASSES: &[&str] = &[
    "confluence-information-macro-icon",
    "confluence-information-macro-title",
    "aui-icon",
    "panelHeader",
    "ak-editor-panel__icon",
];

const EXPAND_BODY_CLASSES: &[&str] = &["expand-content", "expand-content-wrapper"];

const EXPAND_TITLE_CLASSES: &[&str] = &["expand-control-text", "expand-title"];

const EXPAND_CHROME_CLASSES: &[&str] = &["expand-control", "expand-icon"];

const DEFAULT_EXPAND_TITLE: &str = "Click to expand";

const LANGUAGE_ALIASES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("jscript", "javascript"),
    ("ts", "typescript"),
    ("py", "python"),
    ("python3", "python"),
    ("sh", "bash"),
    ("shell", "bash"),
    ("zsh", "bash"),
    ("yml", "yaml"),
    ("c#", "csharp"),
    ("cs", "csharp"),
    ("c++", "cpp"),
    ("rb", "ruby"),
    ("kt", "kotlin"),
    ("ps", "powershell"),
    ("ps1", "powershell"),
    ("plain", "text"),
    ("none", "text"),
    ("xhtml", "html"),
];

static RE_BRUSH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)brush:\s*([\w#+-]+)").unwrap());

static RE_LANG_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:language|lang|brush)-([\w#+-]+)$").unwrap());

/// What the table and image sub-passes found.
#[derive(Debug, Clone, Default)]
pub struct NormalizeReport {
    pub tables: usize,
    /// One descriptor per `<img>`, document order.
    pub images: Vec<ImageDescriptor>,
}

/// Run every sub-pass over `root`, in order.
///
/// `origin` is the absolute base for links and images; `None` leaves
/// relative URLs as they are.
pub fn normalize(root: &mut Element, origin: Option<&Url>) -> NormalizeReport {
    let noise = remove_noise(root);
    let emoticons = replace_each(root, &mut emoticon);
    let mentions = replace_each(root, &mut mention);
    let issues = replace_each(root, &mut issue_link);
    let links = absolutize_links(root, origin);
    let code = replace_each(root, &mut code_block);
    let panels = replace_each(root, &mut panel);
    let expands = replace_each(root, &mut expand);
    let badges = replace_each(root, &mut status_badge);
    let tasks = mark_task_lists(root);
    debug!(
        "Macros: {} noise, {} emoticons, {} mentions, {} issues, {} links, {} code, {} panels, {} expands, {} badges, {} task lists",
        noise, emoticons, mentions, issues, links, code, panels, expands, badges, tasks
    );

    let tables = tables::normalize_tables(root);
    let images = images::resolve_images(root, origin);
    NormalizeReport { tables, images }
}

/// Visit every element below `root`, replacing it with whatever `rewrite`
/// returns. The walk continues into the replacement.
fn replace_each(root: &mut Element, rewrite: &mut dyn FnMut(&mut Element) -> Option<Node>) -> usize {
    let mut count = 0usize;
    dom::rewrite_children(root, &mut |node: &mut Node| {
        let replacement = match node {
            Node::Element(e) => rewrite(e),
            Node::Text(_) => None,
        };
        if let Some(r) = replacement {
            *node = r;
            count += 1;
        }
        Visit::Descend
    });
    count
}

// ── 1. noise ─────────────────────────────────────────────────────────────

fn is_noise(e: &Element) -> bool {
    e.is_any(NOISE_TAGS)
        || e.has_any_class(NOISE_CLASSES)
        || e.attr("data-macro-name").is_some_and(|m| NOISE_MACROS.contains(&m))
        || e.attr("id").is_some_and(|id| NOISE_IDS.contains(&id))
        || (e.is("button") && e.classes().any(|c| c.contains("edit")))
}

fn remove_noise(root: &mut Element) -> usize {
    root.remove_where(&is_noise)
}

// ── 2. emoticons ─────────────────────────────────────────────────────────

fn emoticon(e: &mut Element) -> Option<Node> {
    let is_emoticon = (e.is("img") && e.has_class("emoticon"))
        || e.has_attr("data-emoji-short-name")
        || e.has_class("emoji");
    if !is_emoticon {
        return None;
    }
    let token = e
        .attr_nonempty("data-emoji-short-name")
        .or_else(|| e.attr_nonempty("alt"))
        .or_else(|| e.attr_nonempty("title"))
        .map(str::to_string)
        .or_else(|| {
            e.find(&|d| d.has_attr("alt"))
                .and_then(|d| d.attr_nonempty("alt"))
                .map(str::to_string)
        })
        .unwrap_or_else(|| e.normalized_text());
    Some(Node::Text(token))
}

// ── 3. mentions ──────────────────────────────────────────────────────────

fn mention(e: &mut Element) -> Option<Node> {
    let is_mention = (e.is("a") && e.has_class("confluence-userlink"))
        || e.has_class("user-mention")
        || e.has_attr("data-mention-id");
    if !is_mention {
        return None;
    }
    let text = e.normalized_text();
    let name = Some(text.trim_start_matches('@').trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| e.attr_nonempty("data-username").map(str::to_string))
        .or_else(|| e.attr_nonempty("title").map(str::to_string));
    Some(Node::Text(name.map(|n| format!("@{n}")).unwrap_or_default()))
}

// ── 4. issue-tracker references ──────────────────────────────────────────

fn issue_link(e: &mut Element) -> Option<Node> {
    let is_issue = e.has_class("jira-issue")
        || e.has_class("jira-issue-macro")
        || e.has_attr("data-jira-key");
    if !is_issue {
        return None;
    }
    let text = Some(e.normalized_text())
        .filter(|t| !t.is_empty())
        .or_else(|| e.attr_nonempty("data-jira-key").map(str::to_string))
        .unwrap_or_default();
    let href = e
        .attr_nonempty("href")
        .map(str::to_string)
        .or_else(|| {
            e.find(&|d| d.is("a") && d.attr_nonempty("href").is_some())
                .and_then(|a| a.attr_nonempty("href"))
                .map(str::to_string)
        });
    Some(match href {
        Some(href) => Node::Element(Element::new("a").with_attr("href", href).with_text(text)),
        None => Node::Text(text),
    })
}

// ── links ────────────────────────────────────────────────────────────────

fn absolutize_links(root: &mut Element, origin: Option<&Url>) -> usize {
    let mut count = 0usize;
    dom::rewrite_children(root, &mut |node: &mut Node| {
        if let Node::Element(e) = node {
            if e.is("a") && rewrite_href(e, origin) {
                count += 1;
            }
        }
        Visit::Descend
    });
    count
}

/// Returns true when the href changed.
fn rewrite_href(a: &mut Element, origin: Option<&Url>) -> bool {
    let Some(href) = a.attr("href").map(|h| h.trim().to_string()) else {
        return false;
    };
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") {
        a.remove_attr("href");
        return true;
    }
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return false;
    }
    let Some(absolute) = origin.and_then(|o| o.join(&href).ok()) else {
        return false;
    };
    let absolute = absolute.to_string();
    if absolute == href {
        return false;
    }
    a.set_attr("href", absolute);
    true
}

// ── 5. code blocks ───────────────────────────────────────────────────────

fn is_code_block(e: &Element) -> bool {
    (e.is("div") && e.has_class("code") && e.has_class("panel"))
        || e.has_class("code-block")
        || e.attr("data-macro-name").is_some_and(|m| m == "code" || m == "noformat")
        || e.is("pre")
}

fn code_block(e: &mut Element) -> Option<Node> {
    if !is_code_block(e) {
        return None;
    }
    let language = detect_language(e);
    // Legacy code macros carry a title bar next to the <pre>.
    let source = e
        .find(&|d| d.is("pre"))
        .map(Element::text_content)
        .unwrap_or_else(|| e.text_content());
    let source = source.trim_matches('\n').to_string();

    let mut code = Element::new("code");
    if !language.is_empty() {
        code.set_attr("class", format!("language-{language}"));
    }
    Some(Node::Element(
        Element::new("pre").with_child(code.with_text(source)),
    ))
}

/// Syntax-highlighter parameters, then class names, then data attributes,
/// each checked on the element and its descendants. Empty when none hit.
pub fn detect_language(e: &Element) -> String {
    let on_self_or_below = |probe: &dyn Fn(&Element) -> Option<String>| -> Option<String> {
        probe(e).or_else(|| e.find(&|d| probe(d).is_some()).and_then(probe))
    };

    let from_params = |d: &Element| -> Option<String> {
        let params = d.attr("data-syntaxhighlighter-params")?;
        RE_BRUSH.captures(params).map(|c| c[1].to_string())
    };
    let from_class = |d: &Element| -> Option<String> {
        d.classes()
            .find_map(|c| RE_LANG_CLASS.captures(c).map(|cap| cap[1].to_string()))
    };
    let from_data = |d: &Element| -> Option<String> {
        d.attr_nonempty("data-language")
            .or_else(|| d.attr_nonempty("data-lang"))
            .map(str::to_string)
    };

    on_self_or_below(&from_params)
        .or_else(|| on_self_or_below(&from_class))
        .or_else(|| on_self_or_below(&from_data))
        .map(|token| normalize_language(&token))
        .unwrap_or_default()
}

/// Map a highlighter token to its canonical fence name.
pub fn normalize_language(token: &str) -> String {
    let lower = token.trim().to_ascii_lowercase();
    LANGUAGE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lower)
}

// ── 6. panels ────────────────────────────────────────────────────────────

fn panel_label(e: &Element) -> Option<String> {
    if let Some((_, label)) = PANEL_CLASS_LABELS.iter().find(|(c, _)| e.has_class(c)) {
        return Some(label.to_string());
    }
    if let Some(kind) = e.attr_nonempty("data-panel-type") {
        return Some(capitalize(kind));
    }
    if let Some(name) = e.attr("data-macro-name") {
        if let Some((_, label)) = PANEL_MACRO_LABELS.iter().find(|(m, _)| *m == name) {
            return Some(label.to_string());
        }
    }
    if e.has_class("panel") {
        return e
            .find(&|d| d.has_any_class(&["panelHeader", "panel-header"]))
            .map(Element::normalized_text)
            .filter(|t| !t.is_empty());
    }
    None
}

fn is_panel(e: &Element) -> bool {
    if e.has_class("code") {
        return false;
    }
    e.has_class("confluence-information-macro")
        || PANEL_CLASS_LABELS.iter().any(|(c, _)| e.has_class(c))
        || e.has_attr("data-panel-type")
        || e.attr("data-macro-name")
            .is_some_and(|m| m == "panel" || PANEL_MACRO_LABELS.iter().any(|(n, _)| *n == m))
        || (e.is("div") && e.has_class("panel"))
}

fn panel(e: &mut Element) -> Option<Node> {
    if !is_panel(e) {
        return None;
    }
    let label = panel_label(e).unwrap_or_else(|| "Note".to_string());
    let emoji = PANEL_EMOJI
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, emoji)| *emoji)
        .unwrap_or(DEFAULT_PANEL_EMOJI);

    // An information macro's own title would otherwise be dropped with the chrome.
    let title = e
        .find(&|d| d.has_class("confluence-information-macro-title"))
        .map(Element::normalized_text)
        .filter(|t| !t.is_empty());

    let mut quote = Element::new("blockquote").with_child(
        Element::new("p").with_child(Element::new("strong").with_text(format!("{emoji} {label}:"))),
    );
    if let Some(title) = title {
        quote = quote.with_child(Element::new("p").with_child(Element::new("strong").with_text(title)));
    }
    Some(Node::Element(quote.with_children(body_children(
        e,
        PANEL_BODY_CLASSES,
        PANEL_CHROME_CLASSES,
    ))))
}

/// Take the children of the first descendant carrying a body class, or all
/// children minus the chrome.
fn body_children(e: &mut Element, body_classes: &[&str], chrome_classes: &[&str]) -> Vec<Node> {
    if let Some(body) = e.find_mut(&|d| d.has_any_class(body_classes)) {
        return std::mem::take(&mut body.children);
    }
    std::mem::take(&mut e.children)
        .into_iter()
        .filter(|n| !matches!(n, Node::Element(c) if c.has_any_class(chrome_classes)))
        .collect()
}

fn capitalize(s: &str) -> String {
    let lower = s.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── 7. expand ────────────────────────────────────────────────────────────

fn expand(e: &mut Element) -> Option<Node> {
    let is_expand = e.has_class("expand-container")
        || e.attr("data-macro-name") == Some("expand")
        || e.attr("data-node-type") == Some("expand");
    if !is_expand {
        return None;
    }
    let title = e
        .attr_nonempty("data-title")
        .map(str::to_string)
        .or_else(|| {
            e.find(&|d| d.has_any_class(EXPAND_TITLE_CLASSES))
                .map(Element::normalized_text)
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_EXPAND_TITLE.to_string());

    let body = body_children(e, EXPAND_BODY_CLASSES, EXPAND_CHROME_CLASSES);
    Some(Node::Element(
        Element::new("details")
            .with_child(Element::new("summary").with_text(title))
            .with_children(body),
    ))
}

// ── 8. status badges ─────────────────────────────────────────────────────

fn status_badge(e: &mut Element) -> Option<Node> {
    let is_badge = e.has_class("status-macro")
        || e.has_class("aui-lozenge")
        || e.attr("data-node-type") == Some("status")
        || e.attr("data-macro-name") == Some("status");
    if !is_badge {
        return None;
    }
    let text = e.normalized_text().to_uppercase();
    if text.is_empty() {
        return Some(Node::text(""));
    }
    Some(Node::Text(format!(" `{text}` ")))
}

// ── 9. task lists ────────────────────────────────────────────────────────

fn is_task_list(e: &Element) -> bool {
    e.has_any_class(&["inline-task-list", "task-list", "contains-task-list"])
        || e.has_attr("data-inline-tasks-content-id")
        || e.attr("data-node-type") == Some("actionList")
}

fn is_checkbox(e: &Element) -> bool {
    e.is("input") && e.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("checkbox"))
}

fn task_checked(item: &Element) -> bool {
    if let Some(marked) = item.attr("data-task-checked") {
        return marked == "true";
    }
    item.has_class("checked")
        || item
            .attr("data-task-state")
            .is_some_and(|s| s.eq_ignore_ascii_case("checked") || s.eq_ignore_ascii_case("done"))
        || item.attr("aria-checked") == Some("true")
        || own_checkbox(item).is_some_and(|c| c.has_attr("checked"))
}

fn is_nested_list(e: &Element) -> bool {
    e.is_any(&["ul", "ol"]) || is_task_list(e)
}

/// First checkbox belonging to `item` itself; nested lists are not entered.
fn own_checkbox(item: &Element) -> Option<&Element> {
    for child in item.element_children() {
        if is_checkbox(child) {
            return Some(child);
        }
        if is_nested_list(child) {
            continue;
        }
        if let Some(found) = own_checkbox(child) {
            return Some(found);
        }
    }
    None
}

fn strip_own_checkboxes(item: &mut Element) {
    item.children.retain(|n| !matches!(n, Node::Element(c) if is_checkbox(c)));
    for child in item.element_children_mut() {
        if !is_nested_list(child) {
            strip_own_checkboxes(child);
        }
    }
}

fn mark_task_lists(root: &mut Element) -> usize {
    let mut count = 0usize;
    dom::rewrite_children(root, &mut |node: &mut Node| {
        if let Node::Element(list) = node {
            if is_task_list(list) {
                if !list.is_any(&["ul", "ol"]) {
                    list.tag = "ul".to_string();
                }
                for item in list.element_children_mut() {
                    item.tag = "li".to_string();
                    let checked = task_checked(item);
                    item.set_attr("data-task-checked", checked.to_string());
                    strip_own_checkboxes(item);
                }
                count += 1;
            }
        }
        Visit::Descend
    });
    count
}
