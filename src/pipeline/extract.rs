//! Extraction: locate the content root, title and metadata in a raw page.
//!
//! Every lookup is an ordered list of CSS selectors tried first-to-last.
//! The content root is mandatory; title and each metadata field are
//! independently best-effort.
//!
//! The parsed `scraper::Html` is only read. The chosen root is deep-copied
//! into an owned [`Element`], which is what later passes mutate.

use crate::config::MIN_CONTENT_ROOT_CHARS;
use crate::dom::{self, Element};
use crate::error::Wiki2MdError;
use crate::output::{ExtractedPage, Metadata};
use crate::pipeline::input::RawPage;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

/// Content-root candidates: new editor renderer, legacy wiki containers,
/// then generic page landmarks.
const CONTENT_ROOT_SELECTORS: &[&str] = &[
    ".ak-renderer-document",
    "[data-testid=\"renderer-page\"]",
    "#main-content.wiki-content",
    ".wiki-content",
    "#main-content",
    "#content",
    "main",
    "article",
    "[role=\"main\"]",
    "body",
];

const TITLE_SELECTORS: &[&str] = &[
    "[data-testid=\"title-text\"]",
    "#title-text",
    "h1.pagetitle",
    ".page-title",
    "meta[property=\"og:title\"]",
];

/// Where a metadata value is read from on a matched element.
#[derive(Debug, Clone, Copy)]
enum Source {
    Text,
    Attr(&'static str),
}

const SPACE_SELECTORS: &[(&str, Source)] = &[
    ("meta[name=\"ajs-space-name\"]", Source::Attr("content")),
    ("meta[name=\"confluence-space-name\"]", Source::Attr("content")),
    ("[data-testid=\"breadcrumbs\"] li:first-child a", Source::Text),
    ("#breadcrumbs li:first-child a", Source::Text),
];

const AUTHOR_SELECTORS: &[(&str, Source)] = &[
    ("meta[name=\"ajs-page-author\"]", Source::Attr("content")),
    (".page-metadata .author a", Source::Text),
    ("[data-testid=\"byline\"] a", Source::Text),
    (".author a", Source::Text),
    ("meta[name=\"author\"]", Source::Attr("content")),
];

const LAST_MODIFIED_SELECTORS: &[(&str, Source)] = &[
    ("meta[name=\"ajs-last-modified\"]", Source::Attr("content")),
    (".page-metadata .last-modified", Source::Text),
    ("[data-testid=\"page-last-modified\"]", Source::Text),
    ("time[datetime]", Source::Attr("datetime")),
];

const LABEL_SELECTORS: &[&str] = &[
    "#labels-section .aui-label a",
    ".labels-content .label",
    "[data-testid=\"labels-list\"] a",
    "a.aui-label-split-main",
];

static RE_SITE_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+[-–|]\s+(?:atlassian\s+)?confluence(?:\s+cloud)?\s*$").unwrap()
});

/// The content root and everything found around it.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub title: String,
    /// Owned copy of the content root.
    pub root: Element,
    /// Serialised inner HTML of the content root, as the source had it.
    pub html: String,
    pub metadata: Metadata,
}

impl ExtractedDocument {
    /// Drop the working tree, keeping what a host receives.
    pub fn into_page(self) -> ExtractedPage {
        ExtractedPage {
            title: self.title,
            html: self.html,
            metadata: self.metadata,
        }
    }
}

/// Extract the content root, title and metadata from a raw page.
///
/// # Errors
/// [`Wiki2MdError::Extraction`] when no selector yields a non-empty root.
pub fn extract(page: &RawPage) -> Result<ExtractedDocument, Wiki2MdError> {
    let document = Html::parse_document(&page.html);

    let root_ref = find_content_root(&document).ok_or_else(|| {
        Wiki2MdError::extraction(
            "Could not find the page content. Make sure a wiki page is open and fully loaded.",
        )
    })?;

    let html = root_ref.inner_html();
    let root = dom::from_scraper(root_ref);

    let metadata = Metadata {
        source_url: Some(page.url.clone()).filter(|u| !u.is_empty()),
        space: first_value(&document, SPACE_SELECTORS),
        author: first_value(&document, AUTHOR_SELECTORS),
        last_modified: first_value(&document, LAST_MODIFIED_SELECTORS),
        labels: labels(&document),
    };

    let title = resolve_title(&document, metadata.space.as_deref());
    info!(
        "Extracted '{}' ({} elements, {} bytes of HTML)",
        title,
        root.element_count(),
        html.len()
    );

    Ok(ExtractedDocument {
        title,
        root,
        html,
        metadata,
    })
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let sel = Selector::parse(selector).ok()?;
    document.select(&sel).next()
}

/// First candidate longer than the threshold, else the first non-empty one.
fn find_content_root(document: &Html) -> Option<ElementRef<'_>> {
    let mut fallback: Option<ElementRef<'_>> = None;
    for selector in CONTENT_ROOT_SELECTORS {
        let Some(candidate) = select_first(document, selector) else {
            continue;
        };
        let len = candidate.inner_html().trim().len();
        if len > MIN_CONTENT_ROOT_CHARS {
            debug!("Content root: '{}' ({} chars)", selector, len);
            return Some(candidate);
        }
        if len > 0 && fallback.is_none() {
            fallback = Some(candidate);
        }
    }
    if fallback.is_some() {
        debug!("Content root: short fallback candidate");
    }
    fallback
}

fn element_text(el: &ElementRef<'_>) -> String {
    dom::collapse_whitespace(&el.text().collect::<String>())
        .trim()
        .to_string()
}

fn read(el: &ElementRef<'_>, source: Source) -> Option<String> {
    let value = match source {
        Source::Text => element_text(el),
        Source::Attr(name) => dom::collapse_whitespace(el.value().attr(name)?)
            .trim()
            .to_string(),
    };
    Some(value).filter(|v| !v.is_empty())
}

fn first_value(document: &Html, selectors: &[(&str, Source)]) -> Option<String> {
    selectors
        .iter()
        .find_map(|(selector, source)| read(&select_first(document, selector)?, *source))
}

fn labels(document: &Html) -> Vec<String> {
    for selector in LABEL_SELECTORS {
        let Ok(sel) = Selector::parse(selector) else {
            continue;
        };
        let mut found: Vec<String> = Vec::new();
        for el in document.select(&sel) {
            let text = element_text(&el);
            if !text.is_empty() && !found.contains(&text) {
                found.push(text);
            }
        }
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

fn resolve_title(document: &Html, space: Option<&str>) -> String {
    for selector in TITLE_SELECTORS {
        let Some(el) = select_first(document, selector) else {
            continue;
        };
        let source = if el.value().name() == "meta" {
            Source::Attr("content")
        } else {
            Source::Text
        };
        if let Some(title) = read(&el, source) {
            return title;
        }
    }

    let doc_title = select_first(document, "title")
        .map(|t| element_text(&t))
        .unwrap_or_default();
    let title = strip_site_suffix(&doc_title, space);
    if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    }
}

/// `"Page - Space - Confluence"` → `"Page"`.
fn strip_site_suffix(title: &str, space: Option<&str>) -> String {
    let mut title = RE_SITE_SUFFIX.replace(title.trim(), "").into_owned();
    if let Some(space) = space.filter(|s| !s.is_empty()) {
        for sep in [" - ", " – ", " | "] {
            if let Some(stripped) = title.strip_suffix(&format!("{sep}{space}")) {
                title = stripped.to_string();
                break;
            }
        }
    }
    title.trim().to_string()
}
