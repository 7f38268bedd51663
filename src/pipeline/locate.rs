//! Table location: find every `<table>` in a filing and parse it into a grid.
//!
//! Filings are exported by word processors and are rarely valid HTML, so
//! parsing goes through `scraper` (html5ever) which recovers the same tree a
//! browser would build.
//!
//! ## Caption lookup
//!
//! EDGAR filings wrap each table in a `<div>`; the heading that names the
//! table ("Revenue by Reportable Segments", "(In millions)") is the node just
//! before that wrapper. The caption of a table is therefore the text of the
//! nearest preceding sibling of the table's *parent*, skipping blank text
//! nodes and comments.
//!
//! ## Grid expansion
//!
//! `colspan`/`rowspan` are expanded by repeating the cell's text into every
//! grid slot it covers, so that a spanned header such as
//! `<th colspan=2>Revenue</th>` labels both columns below it.

use crate::error::{TableError, TablexError};
use crate::normalize::{flatten_stacked_header, Normalizer};
use crate::table::{Cell, NormalizedTable, RawTable, TableFragment};
use once_cell::sync::Lazy;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::path::Path;
use tracing::debug;

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());

/// Upper bounds on span attributes; browsers clamp the same way.
const MAX_COLSPAN: usize = 1000;
const MAX_ROWSPAN: usize = 65534;
/// Widest grid a table may expand to; wider tables are reported unparseable.
const MAX_GRID_WIDTH: usize = MAX_COLSPAN;

/// Locates table elements in an HTML document.
#[derive(Debug, Clone, Copy)]
pub struct TableLocator {
    with_captions: bool,
}

impl Default for TableLocator {
    fn default() -> Self {
        Self {
            with_captions: true,
        }
    }
}

impl TableLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether fragments carry the text preceding the table's parent.
    pub fn with_captions(mut self, v: bool) -> Self {
        self.with_captions = v;
        self
    }

    /// Every `<table>` element, nested ones included, in document order.
    pub fn locate(&self, html: &str) -> Vec<TableFragment> {
        let document = Html::parse_document(html);
        let fragments: Vec<TableFragment> = document
            .select(&TABLE)
            .enumerate()
            .map(|(index, table)| TableFragment {
                index,
                html: table.html(),
                caption: if self.with_captions {
                    preceding_text(&table)
                } else {
                    None
                },
            })
            .collect();
        debug!("Located {} tables", fragments.len());
        fragments
    }

    /// Read `path` and locate its tables.
    pub fn locate_file(&self, path: &Path) -> Result<Vec<TableFragment>, TablexError> {
        let bytes = std::fs::read(path).map_err(|e| TablexError::from_io(path, e))?;
        // Older filings are Windows-1252; keep going on stray bytes.
        let html = String::from_utf8_lossy(&bytes);
        Ok(self.locate(&html))
    }
}

/// Text of the nearest non-blank sibling before the table's parent.
fn preceding_text(table: &ElementRef<'_>) -> Option<String> {
    let parent = table.parent()?;
    for node in parent.prev_siblings() {
        let text = match node.value() {
            Node::Text(t) => {
                let text = collapse_whitespace(t);
                if text.is_empty() {
                    continue;
                }
                text
            }
            Node::Element(_) => ElementRef::wrap(node)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .unwrap_or_default(),
            _ => continue,
        };
        return (!text.is_empty()).then_some(text);
    }
    None
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Fragment parsing ─────────────────────────────────────────────────────

/// One `<tr>` with where it came from.
struct SourceRow<'a> {
    row: ElementRef<'a>,
    in_thead: bool,
}

/// Direct rows of a table, not rows of nested tables.
fn direct_rows<'a>(table: &ElementRef<'a>) -> Vec<SourceRow<'a>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(SourceRow {
                row: child,
                in_thead: false,
            }),
            section @ ("thead" | "tbody" | "tfoot") => {
                for inner in child.children().filter_map(ElementRef::wrap) {
                    if inner.value().name() == "tr" {
                        rows.push(SourceRow {
                            row: inner,
                            in_thead: section == "thead",
                        });
                    }
                }
            }
            _ => {}
        }
    }
    rows
}

fn direct_cells<'a>(row: &ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .collect()
}

fn span(cell: &ElementRef<'_>, attr: &str, max: usize) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .map_or(1, |n| n.min(max))
}

fn cell_text(cell: &ElementRef<'_>) -> Cell {
    let text = collapse_whitespace(&cell.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// Parse one located fragment into a [`RawTable`].
///
/// Header rows are the rows of `<thead>`, or failing that the leading rows
/// made only of `<th>` cells. Several header rows are joined per column.
pub fn parse_fragment(fragment: &TableFragment) -> Result<RawTable, TableError> {
    let unparseable = |reason: &str| TableError::Unparseable {
        index: fragment.index,
        reason: reason.to_string(),
    };

    let document = Html::parse_fragment(&fragment.html);
    let table = document
        .select(&TABLE)
        .next()
        .ok_or_else(|| unparseable("no table element"))?;

    let rows = direct_rows(&table);
    if rows.is_empty() {
        return Err(unparseable("table has no rows"));
    }

    let has_thead = rows.iter().any(|r| r.in_thead);
    let mut header_rows = 0;
    for r in &rows {
        let is_header = if has_thead {
            r.in_thead
        } else {
            let cells = direct_cells(&r.row);
            !cells.is_empty() && cells.iter().all(|c| c.value().name() == "th")
        };
        if !is_header {
            break;
        }
        header_rows += 1;
    }

    // Slot state: None = not yet covered, Some(cell) = covered.
    let mut grid: Vec<Vec<Option<Cell>>> = vec![Vec::new(); rows.len()];
    for (ri, r) in rows.iter().enumerate() {
        let mut col = 0;
        for cell in direct_cells(&r.row) {
            while grid[ri].get(col).is_some_and(Option::is_some) {
                col += 1;
            }
            let text = cell_text(&cell);
            let colspan = span(&cell, "colspan", MAX_COLSPAN);
            let rowspan = span(&cell, "rowspan", MAX_ROWSPAN).min(rows.len() - ri);
            if col + colspan > MAX_GRID_WIDTH {
                return Err(unparseable(&format!(
                    "row {ri} spans more than {MAX_GRID_WIDTH} columns"
                )));
            }
            for target in &mut grid[ri..ri + rowspan] {
                if target.len() < col + colspan {
                    target.resize(col + colspan, None);
                }
                for slot in &mut target[col..col + colspan] {
                    *slot = Some(text.clone());
                }
            }
            col += colspan;
        }
    }

    let grid: Vec<Vec<Cell>> = grid
        .into_iter()
        .map(|r| r.into_iter().map(Option::flatten).collect())
        .collect();
    if grid.iter().all(Vec::is_empty) {
        return Err(unparseable("table has no cells"));
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    let (head, body) = grid.split_at(header_rows);
    let headers = join_header_rows(head, width);

    Ok(RawTable::new(headers, body.to_vec()).with_caption(fragment.caption.clone()))
}

/// Flatten stacked header rows into one label per column.
///
/// Consecutive repeats (a spanned label copied down by `rowspan`) appear once.
fn join_header_rows(head: &[Vec<Cell>], width: usize) -> Vec<Cell> {
    (0..width)
        .map(|i| {
            let mut parts: Vec<&str> = Vec::new();
            for label in head.iter().filter_map(|r| r.get(i)?.as_deref()) {
                if parts.last() != Some(&label) {
                    parts.push(label);
                }
            }
            (!parts.is_empty()).then(|| parts.join(" "))
        })
        .collect()
}

// ── Cleaning path ────────────────────────────────────────────────────────

/// The normalised markup tables of a filing.
#[derive(Debug, Clone, Default)]
pub struct MarkupTables {
    /// `(fragment index, table)` for every fragment that parsed.
    pub tables: Vec<(usize, NormalizedTable)>,
    /// Fragments that could not be turned into a table.
    pub skipped: usize,
}

impl MarkupTables {
    /// The normalised table of fragment `index`, if it parsed.
    pub fn get(&self, index: usize) -> Option<&NormalizedTable> {
        self.tables
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, t)| t)
    }
}

/// Parse and normalise located fragments, skipping (and counting) the ones
/// that are not tables.
pub fn normalize_fragments(
    fragments: &[TableFragment],
    normalizer: &Normalizer,
    flatten_headers: bool,
) -> MarkupTables {
    let mut out = MarkupTables::default();
    for fragment in fragments {
        match parse_fragment(fragment) {
            Ok(raw) => {
                let raw = if flatten_headers {
                    flatten_stacked_header(&raw)
                } else {
                    raw
                };
                out.tables.push((fragment.index, normalizer.normalize(&raw)));
            }
            Err(e) => {
                debug!("Skipping fragment: {}", e);
                out.skipped += 1;
            }
        }
    }
    out
}

/// Locate, parse and normalise every table of `html`.
pub fn extract_markup_tables(
    html: &str,
    normalizer: &Normalizer,
    flatten_headers: bool,
) -> MarkupTables {
    let fragments = TableLocator::new().locate(html);
    normalize_fragments(&fragments, normalizer, flatten_headers)
}
