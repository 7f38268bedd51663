//! Text-layout table detection over pdfium text segments.
//!
//! A rendered table PDF has no ruling information we can trust (WeasyPrint
//! draws borders only if the filing's CSS asked for them), so this backend
//! works from text geometry alone:
//!
//! 1. collect every text segment with its bounding box (top-left origin);
//! 2. cluster segments into rows by vertical centre;
//! 3. derive column intervals from the horizontal extent of the most
//!    populated rows (rows with blanks would merge neighbouring columns);
//! 4. assign each segment to the interval containing its centre, or the
//!    nearest one.
//!
//! One table per page. The first row is the header; blank header slots are
//! named `Col{i}`.

use super::{header_from_first_row, TableExtractor};
use crate::config::{BackendKind, PipelineConfig};
use crate::error::TablexError;
use crate::pipeline::render::bind_pdfium;
use crate::table::{Cell, RawTable};
use pdfium_render::prelude::*;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A positioned piece of text, in points with a top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl TextRun {
    fn centre_x(&self) -> f32 {
        (self.left + self.right) / 2.0
    }

    fn centre_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }
}

/// Tolerances for row and column detection, in points.
#[derive(Debug, Clone, Copy)]
pub struct LayoutSettings {
    /// Runs whose vertical centres differ by at most this share a row.
    pub row_tolerance: f32,
    /// Column extents closer than this are merged into one column.
    pub column_gap: f32,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            row_tolerance: 3.0,
            column_gap: 2.0,
        }
    }
}

/// The pdfium text-layout backend.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    lib_dir: Option<PathBuf>,
    settings: LayoutSettings,
}

impl PdfiumExtractor {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            lib_dir: config.pdfium_lib_dir.clone(),
            settings: LayoutSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LayoutSettings) -> Self {
        self.settings = settings;
        self
    }

    fn page_runs(page: &PdfPage) -> Result<Vec<TextRun>, PdfiumError> {
        let height = page.height().value;
        let text = page.text()?;
        let mut runs = Vec::new();
        for segment in text.segments().iter() {
            let content = segment.text();
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            let bounds = segment.bounds();
            // PDF user space has a bottom-left origin.
            runs.push(TextRun {
                text: content.to_string(),
                left: bounds.left().value,
                right: bounds.right().value,
                top: height - bounds.top().value,
                bottom: height - bounds.bottom().value,
            });
        }
        Ok(runs)
    }
}

impl TableExtractor for PdfiumExtractor {
    fn kind(&self) -> BackendKind {
        BackendKind::Pdfium
    }

    fn extract(&self, pdf: &Path) -> Result<Vec<RawTable>, TablexError> {
        let backend_err = |detail: String| TablexError::Backend {
            backend: BackendKind::Pdfium,
            detail,
        };

        let pdfium = bind_pdfium(self.lib_dir.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| backend_err(format!("cannot open {}: {:?}", pdf.display(), e)))?;

        let mut tables = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let runs = Self::page_runs(&page)
                .map_err(|e| backend_err(format!("page {}: {:?}", idx + 1, e)))?;
            let grid = detect_table(&runs, &self.settings);
            debug!(
                "pdfium: page {} → {} runs, {} rows",
                idx + 1,
                runs.len(),
                grid.len()
            );
            if let Some(table) = header_from_first_row(BackendKind::Pdfium, grid) {
                tables.push(table);
            }
        }
        Ok(tables)
    }
}

// ── Layout analysis ──────────────────────────────────────────────────────

fn by_f32(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Group runs into rows (top to bottom), each row sorted left to right.
fn cluster_rows<'a>(runs: &'a [TextRun], settings: &LayoutSettings) -> Vec<Vec<&'a TextRun>> {
    let mut sorted: Vec<&TextRun> = runs.iter().collect();
    sorted.sort_by(|a, b| by_f32(a.centre_y(), b.centre_y()));

    let mut rows: Vec<Vec<&TextRun>> = Vec::new();
    let mut row_centre = f32::NEG_INFINITY;
    for run in sorted {
        match rows.last_mut() {
            Some(row) if (run.centre_y() - row_centre).abs() <= settings.row_tolerance => {
                row.push(run);
                row_centre = row.iter().map(|r| r.centre_y()).sum::<f32>() / row.len() as f32;
            }
            _ => {
                row_centre = run.centre_y();
                rows.push(vec![run]);
            }
        }
    }
    for row in &mut rows {
        row.sort_by(|a, b| by_f32(a.left, b.left));
    }
    rows
}

/// Column extents from the most populated rows, left to right.
fn column_intervals(rows: &[Vec<&TextRun>], settings: &LayoutSettings) -> Vec<(f32, f32)> {
    let widest = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut spans: Vec<(f32, f32)> = rows
        .iter()
        .filter(|r| r.len() == widest)
        .flat_map(|r| r.iter().map(|run| (run.left, run.right)))
        .collect();
    spans.sort_by(|a, b| by_f32(a.0, b.0));

    let mut merged: Vec<(f32, f32)> = Vec::new();
    for (left, right) in spans {
        match merged.last_mut() {
            Some(last) if left <= last.1 + settings.column_gap => last.1 = last.1.max(right),
            _ => merged.push((left, right)),
        }
    }
    merged
}

fn column_of(x: f32, intervals: &[(f32, f32)]) -> usize {
    if let Some(i) = intervals.iter().position(|&(l, r)| x >= l && x <= r) {
        return i;
    }
    intervals
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (x - a.0).abs().min((x - a.1).abs());
            let db = (x - b.0).abs().min((x - b.1).abs());
            by_f32(da, db)
        })
        .map_or(0, |(i, _)| i)
}

/// Lay text runs out as a grid of cells, top row first.
///
/// Runs landing in the same slot are joined with a space.
pub fn detect_table(runs: &[TextRun], settings: &LayoutSettings) -> Vec<Vec<Cell>> {
    if runs.is_empty() {
        return Vec::new();
    }
    let rows = cluster_rows(runs, settings);
    let intervals = column_intervals(&rows, settings);

    rows.iter()
        .map(|row| {
            let mut cells: Vec<Cell> = vec![None; intervals.len()];
            for run in row {
                let slot = &mut cells[column_of(run.centre_x(), &intervals)];
                match slot {
                    Some(existing) => {
                        existing.push(' ');
                        existing.push_str(&run.text);
                    }
                    None => *slot = Some(run.text.clone()),
                }
            }
            cells
        })
        .collect()
}
