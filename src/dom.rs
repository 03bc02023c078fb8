//! Owned document tree.
//!
//! The pipeline never touches the parsed source document. Extraction deep-copies
//! the chosen content root out of the `scraper` DOM into these plain values,
//! and every later pass rewrites that copy through `&mut`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Nesting beyond this depth is flattened to text during the copy.
const MAX_COPY_DEPTH: usize = 256;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// A node of the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with lower-cased tag name, attributes and ordered children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<Node>,
}

/// Whether [`rewrite_children`] should walk into the node it just visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Descend,
    Skip,
}

impl Node {
    pub fn text(s: impl Into<String>) -> Self {
        Node::Text(s.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            Node::Element(e) => e.text_content(),
            Node::Text(t) => t.clone(),
        }
    }

    /// True for text nodes holding only whitespace.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

impl From<Element> for Node {
    fn from(e: Element) -> Self {
        Node::Element(e)
    }
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    pub fn is_any(&self, tags: &[&str]) -> bool {
        tags.iter().any(|t| self.is(t))
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute value, trimmed, or `None` when missing or blank.
    pub fn attr_nonempty(&self, name: &str) -> Option<&str> {
        self.attr(name).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attrs.remove(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    pub fn has_any_class(&self, classes: &[&str]) -> bool {
        self.classes().any(|c| classes.contains(&c))
    }

    /// Value of one property in the inline `style` attribute, lower-cased.
    pub fn style_value(&self, property: &str) -> Option<String> {
        self.attr("style")?.split(';').find_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            if name.trim().eq_ignore_ascii_case(property) {
                Some(value.trim().to_ascii_lowercase())
            } else {
                None
            }
        })
    }

    /// Remove one property from the inline `style` attribute.
    pub fn remove_style(&mut self, property: &str) {
        let Some(style) = self.attr("style") else {
            return;
        };
        let kept: Vec<&str> = style
            .split(';')
            .map(str::trim)
            .filter(|decl| {
                !decl.is_empty()
                    && decl
                        .split_once(':')
                        .is_none_or(|(name, _)| !name.trim().eq_ignore_ascii_case(property))
            })
            .collect();
        if kept.is_empty() {
            self.remove_attr("style");
        } else {
            let joined = kept.join("; ");
            self.set_attr("style", joined);
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    /// Text content with whitespace runs collapsed and ends trimmed.
    pub fn normalized_text(&self) -> String {
        collapse_whitespace(&self.text_content()).trim().to_string()
    }

    pub fn element_children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn element_children_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// First descendant (pre-order, excluding `self`) matching `pred`.
    pub fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        for child in self.element_children() {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Mutable first descendant matching `pred`.
    pub fn find_mut(&mut self, pred: &dyn Fn(&Element) -> bool) -> Option<&mut Element> {
        for child in self.element_children_mut() {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_mut(pred) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants matching `pred`, in document order.
    pub fn find_all<'a>(&'a self, pred: &dyn Fn(&Element) -> bool, out: &mut Vec<&'a Element>) {
        for child in self.element_children() {
            if pred(child) {
                out.push(child);
            }
            child.find_all(pred, out);
        }
    }

    pub fn contains(&self, pred: &dyn Fn(&Element) -> bool) -> bool {
        self.find(pred).is_some()
    }

    /// Recursively drop every descendant element matching `pred`.
    ///
    /// Returns the number of removed elements.
    pub fn remove_where(&mut self, pred: &dyn Fn(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if pred(e)));
        let mut removed = before - self.children.len();
        for child in self.element_children_mut() {
            removed += child.remove_where(pred);
        }
        removed
    }

    /// Number of elements in this subtree, `self` included.
    pub fn element_count(&self) -> usize {
        1 + self.element_children().map(Element::element_count).sum::<usize>()
    }

    /// Serialise the children as HTML.
    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        write_nodes(&self.children, &mut out);
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn write_nodes(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => escape_into(t, false, out),
            Node::Element(e) => write_element(e, out),
        }
    }
}

fn write_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(value, true, out);
        out.push('"');
    }
    out.push('>');
    if el.is_any(VOID_TAGS) {
        return;
    }
    write_nodes(&el.children, out);
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn escape_into(s: &str, attribute: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) if e.is("br") => out.push('\n'),
            Node::Element(e) => collect_text(&e.children, out),
        }
    }
}

/// Walk `parent`'s subtree in pre-order, handing every node to `f` by `&mut`.
///
/// `f` may replace the node outright (`*node = …`). When it returns
/// [`Visit::Descend`] the walk continues into whatever now sits in that slot;
/// [`Visit::Skip`] leaves the subtree alone.
pub fn rewrite_children(parent: &mut Element, f: &mut dyn FnMut(&mut Node) -> Visit) {
    for child in parent.children.iter_mut() {
        if f(child) == Visit::Descend {
            if let Node::Element(e) = child {
                rewrite_children(e, f);
            }
        }
    }
}

/// Replace each whitespace run with a single space.
pub fn collapse_whitespace(s: &str) -> String {
    RE_WHITESPACE.replace_all(s, " ").into_owned()
}

/// Deep-copy a parsed element into an owned [`Element`].
///
/// Comments, doctypes and processing instructions are dropped.
pub fn from_scraper(el: scraper::ElementRef<'_>) -> Element {
    copy_element(el, 0)
}

fn copy_element(el: scraper::ElementRef<'_>, depth: usize) -> Element {
    let value = el.value();
    let mut out = Element::new(value.name());
    for (name, val) in value.attrs() {
        out.attrs.insert(name.to_ascii_lowercase(), val.to_string());
    }

    if depth >= MAX_COPY_DEPTH {
        let text: String = el.text().collect();
        if !text.is_empty() {
            out.children.push(Node::Text(text));
        }
        return out;
    }

    for child in el.children() {
        match child.value() {
            scraper::Node::Element(_) => {
                if let Some(child_el) = scraper::ElementRef::wrap(child) {
                    out.children
                        .push(Node::Element(copy_element(child_el, depth + 1)));
                }
            }
            scraper::Node::Text(t) => out.children.push(Node::Text(String::from(&**t))),
            _ => {}
        }
    }
    out
}
