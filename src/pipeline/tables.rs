//! Table normalisation: force any table into something a pipe table can hold.
//!
//! GFM pipe tables have no spans, no multi-line cells and require a header
//! row. Wiki tables routinely break all three. Each table goes through five
//! steps, in order:
//!
//! 1. **Span expansion** — lay cells out on a `rows × max_columns` grid.
//!    Origin cells keep their node, covered positions get empty cells of the
//!    same kind, holes are padded with empty `<td>`s.
//! 2. **Header promotion** — a first row made only of header-like cells
//!    becomes `<th>`s; cells carrying a header class in later rows too.
//! 3. **Sectioning** — a header first row goes into `<thead>`, the rest into
//!    `<tbody>`.
//! 4. **Header synthesis** — a table with no header row at all gets one,
//!    labelled from the first row when its text is short and plain, otherwise
//!    `Column N`.
//! 5. **Cell linearisation** — block children are unwrapped (joined by
//!    `<br>`), whitespace collapsed, sizing attributes dropped.
//!
//! Running the normaliser on its own output changes nothing.

use crate::config::{HEADER_BACKGROUND_COLORS, MAX_GRID_CELLS, MAX_HEADER_LABEL_CHARS, MAX_SPAN};
use crate::dom::{self, Element, Node, Visit};
use tracing::debug;

/// Class tokens that mark a cell as a header wherever it sits.
const HEADER_CLASSES: &[&str] = &[
    "confluenceTh",
    "tableHeader",
    "table-header",
    "header-cell",
    "highlight-grey",
];

/// Elements unwrapped during cell linearisation.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "caption", "dd", "details", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "summary", "table", "tbody", "td", "tfoot", "th",
    "thead", "tr", "ul",
];

/// Content that disqualifies a first-row cell from becoming a header label.
const RICH_CONTENT_TAGS: &[&str] = &[
    "img", "picture", "svg", "video", "audio", "iframe", "object", "embed", "code", "pre", "table",
];

const SECTION_TAGS: &[&str] = &["thead", "tbody", "tfoot"];

/// One position of the expanded grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridEntry {
    pub origin_row: usize,
    pub origin_col: usize,
    /// The top-left position of the source cell's span.
    pub is_origin: bool,
    /// `(row, cell)` index of the source cell in the pre-expansion rows.
    pub source: (usize, usize),
}

/// Cell placement for one table, `rows × max_columns`.
///
/// `None` marks a position no source cell covers (ragged input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGrid {
    pub max_columns: usize,
    pub rows: Vec<Vec<Option<GridEntry>>>,
}

impl TableGrid {
    /// Place the cells of `rows` on a grid, honouring `colspan` / `rowspan`.
    ///
    /// `max_columns` is the widest row by colspan sum. Rowspans reaching past
    /// the last row are clipped; a row pushed wider than that by rowspans from
    /// above widens the grid rather than losing cells.
    pub fn build(rows: &[Element]) -> Self {
        let n_rows = rows.len();
        let colspan_width = rows
            .iter()
            .map(|r| cells(r).map(|c| span(c, "colspan", 1)).sum::<usize>())
            .max()
            .unwrap_or(0);

        // Degenerate span soup: lay cells out one per position instead.
        let honour_spans = colspan_width.saturating_mul(n_rows) <= MAX_GRID_CELLS;

        let mut grid: Vec<Vec<Option<GridEntry>>> = vec![Vec::new(); n_rows];
        for (r, row) in rows.iter().enumerate() {
            let mut col = 0usize;
            for (i, cell) in cells(row).enumerate() {
                let (colspan, rowspan) = if honour_spans {
                    let rowspan = match span(cell, "rowspan", 1) {
                        0 => n_rows - r,
                        n => n.min(n_rows - r),
                    };
                    (span(cell, "colspan", 1).max(1), rowspan)
                } else {
                    (1, 1)
                };

                while grid[r].get(col).is_some_and(Option::is_some) {
                    col += 1;
                }

                for dr in 0..rowspan {
                    for dc in 0..colspan {
                        let line = &mut grid[r + dr];
                        let c = col + dc;
                        if line.len() <= c {
                            line.resize(c + 1, None);
                        }
                        if line[c].is_none() {
                            line[c] = Some(GridEntry {
                                origin_row: r,
                                origin_col: col,
                                is_origin: dr == 0 && dc == 0,
                                source: (r, i),
                            });
                        }
                    }
                }
                col += colspan;
            }
        }

        let max_columns = grid
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(colspan_width);
        for line in &mut grid {
            line.resize(max_columns, None);
        }

        Self {
            max_columns,
            rows: grid,
        }
    }
}

/// Normalise every table under `root`. Returns how many tables were found.
///
/// Tables nested in a cell are flattened into that cell's text.
pub fn normalize_tables(root: &mut Element) -> usize {
    if root.is("table") {
        normalize_table(root);
        return 1;
    }
    let mut count = 0usize;
    dom::rewrite_children(root, &mut |node: &mut Node| match node {
        Node::Element(e) if e.is("table") => {
            normalize_table(e);
            count += 1;
            Visit::Skip
        }
        _ => Visit::Descend,
    });
    debug!("Normalised {} tables", count);
    count
}

/// A row plus whether it came from a `<thead>`.
struct SourceRow {
    row: Element,
    in_head: bool,
}

/// Run all five normalisation steps on one `<table>`.
pub fn normalize_table(table: &mut Element) {
    strip_sizing(table, false);
    let (mut kept, source_rows) = split_table(table);
    if source_rows.is_empty() {
        table.children = kept;
        return;
    }

    let first_in_head = source_rows[0].in_head;
    let rows: Vec<Element> = source_rows.into_iter().map(|s| s.row).collect();

    // 1. span expansion
    let (mut rows, max_columns) = expand_spans(rows);
    if max_columns == 0 {
        table.children = kept;
        return;
    }

    // 2. header promotion
    promote_headers(&mut rows);

    // 3 + 4. sectioning, header synthesis
    let first_is_header = first_in_head || is_header_row(&rows[0]);
    let head: Option<Element> = if first_is_header {
        let mut first = rows.remove(0);
        retag_cells(&mut first, "th");
        Some(first)
    } else if rows.iter().any(is_header_row) {
        // A header row exists further down; leave the order alone.
        None
    } else {
        let (header, consumed_first) = synthesize_header(&rows[0], max_columns);
        if consumed_first {
            rows.remove(0);
        }
        Some(header)
    };

    // 5. cell linearisation
    let mut head = head;
    for row in head.iter_mut().chain(rows.iter_mut()) {
        for cell in row.element_children_mut() {
            linearize_cell(cell);
        }
    }

    if let Some(head) = head {
        kept.push(Node::Element(Element::new("thead").with_child(head)));
    }
    if !rows.is_empty() {
        kept.push(Node::Element(
            Element::new("tbody").with_children(rows.into_iter().map(Node::Element)),
        ));
    }
    table.children = kept;
}

/// Pull rows out of a table, flattening sections. Returns the non-row
/// children worth keeping (captions) and the rows in document order.
fn split_table(table: &mut Element) -> (Vec<Node>, Vec<SourceRow>) {
    let mut kept = Vec::new();
    let mut rows = Vec::new();
    for child in std::mem::take(&mut table.children) {
        match child {
            Node::Element(e) if e.is("tr") => rows.push(SourceRow {
                row: e,
                in_head: false,
            }),
            Node::Element(e) if e.is_any(SECTION_TAGS) => {
                let in_head = e.is("thead");
                for grandchild in e.children {
                    match grandchild {
                        Node::Element(r) if r.is("tr") => rows.push(SourceRow { row: r, in_head }),
                        other if other.is_blank_text() => {}
                        other => rows.push(SourceRow {
                            row: stray_row(other),
                            in_head: false,
                        }),
                    }
                }
            }
            Node::Element(e) if e.is("caption") => kept.push(Node::Element(e)),
            Node::Element(e) if e.is_any(&["colgroup", "col"]) => {}
            other if other.is_blank_text() => {}
            other => rows.push(SourceRow {
                row: stray_row(other),
                in_head: false,
            }),
        }
    }
    (kept, rows)
}

/// Wrap content found directly inside a table in a one-cell row.
fn stray_row(node: Node) -> Element {
    Element::new("tr").with_child(Element::new("td").with_child(node))
}

fn cells(row: &Element) -> impl Iterator<Item = &Element> {
    row.element_children().filter(|c| c.is_any(&["td", "th"]))
}

fn span(cell: &Element, attr: &str, default: usize) -> usize {
    cell.attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
        .min(MAX_SPAN)
}

/// Step 1: rebuild every row to exactly `max_columns` cells without spans.
///
/// Returns the rebuilt rows and `max_columns`.
pub fn expand_spans(rows: Vec<Element>) -> (Vec<Element>, usize) {
    let grid = TableGrid::build(&rows);

    let mut row_attrs = Vec::with_capacity(rows.len());
    let mut sources: Vec<Vec<Option<Element>>> = Vec::with_capacity(rows.len());
    let mut source_tags: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for row in rows {
        row_attrs.push(row.attrs);
        let mut row_cells = Vec::new();
        let mut tags = Vec::new();
        for child in row.children {
            if let Node::Element(cell) = child {
                if cell.is_any(&["td", "th"]) {
                    tags.push(cell.tag.clone());
                    row_cells.push(Some(cell));
                }
            }
        }
        sources.push(row_cells);
        source_tags.push(tags);
    }

    let rebuilt = grid
        .rows
        .iter()
        .zip(row_attrs)
        .map(|(line, attrs)| {
            let mut tr = Element::new("tr");
            tr.attrs = attrs;
            for entry in line {
                let cell = match entry {
                    Some(e) if e.is_origin => {
                        let (r, i) = e.source;
                        let mut cell = sources[r][i]
                            .take()
                            .unwrap_or_else(|| Element::new(source_tags[r][i].clone()));
                        cell.remove_attr("colspan");
                        cell.remove_attr("rowspan");
                        cell
                    }
                    Some(e) => {
                        let (r, i) = e.source;
                        Element::new(source_tags[r][i].clone())
                    }
                    None => Element::new("td"),
                };
                tr.children.push(Node::Element(cell));
            }
            tr
        })
        .collect();

    (rebuilt, grid.max_columns)
}

/// Step 2.
fn promote_headers(rows: &mut [Element]) {
    let Some((first, rest)) = rows.split_first_mut() else {
        return;
    };
    let first_all_header_like = first.element_children().count() > 0
        && first.element_children().all(is_header_like);
    if first_all_header_like {
        retag_cells(first, "th");
    }
    for row in rest {
        for cell in row.element_children_mut() {
            if cell.has_any_class(HEADER_CLASSES) {
                cell.tag = "th".to_string();
            }
        }
    }
}

fn retag_cells(row: &mut Element, tag: &str) {
    for cell in row.element_children_mut() {
        cell.tag = tag.to_string();
    }
}

fn is_header_row(row: &Element) -> bool {
    row.element_children().count() > 0 && row.element_children().all(|c| c.is("th"))
}

/// Already a `<th>`, carries a header marker, or is one bold run.
pub fn is_header_like(cell: &Element) -> bool {
    cell.is("th") || has_header_marker(cell) || is_single_bold_run(cell)
}

fn has_header_marker(cell: &Element) -> bool {
    if cell.has_any_class(HEADER_CLASSES) || cell.has_attr("data-highlight-colour") {
        return true;
    }
    let background = cell
        .style_value("background-color")
        .or_else(|| cell.style_value("background"))
        .or_else(|| cell.attr_nonempty("data-cell-background").map(str::to_string))
        .or_else(|| cell.attr_nonempty("bgcolor").map(str::to_string));
    background.is_some_and(|bg| {
        let bg: String = bg.to_ascii_lowercase().split_whitespace().collect();
        HEADER_BACKGROUND_COLORS
            .iter()
            .any(|c| c.split_whitespace().collect::<String>() == bg)
    })
}

/// The cell's whole content is a single `<strong>` / `<b>` run, possibly
/// inside one wrapper paragraph.
fn is_single_bold_run(el: &Element) -> bool {
    let mut significant = el.children.iter().filter(|n| !n.is_blank_text());
    let (Some(Node::Element(only)), None) = (significant.next(), significant.next()) else {
        return false;
    };
    if only.is_any(&["strong", "b"]) {
        !only.normalized_text().is_empty()
    } else if only.is_any(&["p", "span", "div"]) {
        is_single_bold_run(only)
    } else {
        false
    }
}

/// Step 4: build a `<th>` row from the first row. The flag tells whether
/// every column took its label from that row, which makes the row redundant.
fn synthesize_header(first_row: &Element, max_columns: usize) -> (Element, bool) {
    let first_cells: Vec<&Element> = first_row.element_children().collect();
    let mut header = Element::new("tr");
    let mut all_labelled = true;
    for col in 0..max_columns {
        let label = first_cells.get(col).and_then(|c| header_label(c));
        let text = match label {
            Some(l) => l,
            None => {
                all_labelled = false;
                format!("Column {}", col + 1)
            }
        };
        header.children.push(Node::Element(Element::new("th").with_text(text)));
    }
    (header, all_labelled)
}

fn header_label(cell: &Element) -> Option<String> {
    if cell.contains(&|e: &Element| e.is_any(RICH_CONTENT_TAGS)) {
        return None;
    }
    let text = cell.normalized_text();
    (!text.is_empty() && text.chars().count() < MAX_HEADER_LABEL_CHARS).then_some(text)
}

/// Step 5: single-line cell content.
pub fn linearize_cell(cell: &mut Element) {
    let segments = flatten_blocks(std::mem::take(&mut cell.children));
    let mut out = Vec::new();
    for segment in segments.into_iter().filter(|s| segment_has_content(s)) {
        if !out.is_empty() {
            out.push(Node::Element(Element::new("br")));
        }
        out.extend(segment);
    }
    collapse_text(&mut out);
    cell.children = out;
    strip_sizing(cell, true);
}

/// Split `nodes` into runs of inline content, unwrapping block elements.
fn flatten_blocks(nodes: Vec<Node>) -> Vec<Vec<Node>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for node in nodes {
        match node {
            Node::Element(e) if e.is_any(BLOCK_TAGS) => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                if e.is("hr") {
                    continue;
                }
                let is_item = e.is("li");
                let mut inner = flatten_blocks(e.children);
                if is_item {
                    if let Some(first) = inner.first_mut() {
                        first.insert(0, Node::text("• "));
                    }
                }
                segments.extend(inner);
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn segment_has_content(segment: &[Node]) -> bool {
    segment.iter().any(|n| match n {
        Node::Text(t) => !t.trim().is_empty(),
        Node::Element(e) => !e.is("br"),
    })
}

fn collapse_text(nodes: &mut [Node]) {
    for node in nodes {
        match node {
            Node::Text(t) => *t = dom::collapse_whitespace(t),
            Node::Element(e) => collapse_text(&mut e.children),
        }
    }
}

fn strip_sizing(el: &mut Element, recursive: bool) {
    el.remove_attr("width");
    el.remove_attr("height");
    for prop in ["width", "height", "min-width", "max-width", "min-height", "max-height"] {
        el.remove_style(prop);
    }
    if recursive {
        for child in el.element_children_mut() {
            strip_sizing(child, true);
        }
    }
}
