//! Tabular values flowing through the pipeline.
//!
//! ```text
//! TableFragment ──parse──▶ RawTable ──normalize──▶ NormalizedTable
//!                                                        │ (vision LLM)
//!                                                        ▼
//!                                          StructuredTableRecord ──▶ SQL rows
//! ```
//!
//! Every stage produces a new value; nothing is mutated after creation.

use crate::config::BackendKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One cell of a raw table. `None` is a null cell.
pub type Cell = Option<String>;

/// One row of a structured record: column name → JSON value.
pub type RecordRow = serde_json::Map<String, serde_json::Value>;

/// One `<table>` element located in the filing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFragment {
    /// 0-based position in document order.
    pub index: usize,
    /// Outer HTML of the table element.
    pub html: String,
    /// Text of the nearest preceding sibling of the table's parent.
    pub caption: Option<String>,
}

/// A table as produced by markup parsing or a PDF extraction backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    /// Column headers; `None` marks an unlabeled column.
    pub headers: Vec<Cell>,
    /// Data rows, in order. Rows may be ragged.
    pub rows: Vec<Vec<Cell>>,
    /// Optional caption carried through normalisation.
    pub caption: Option<String>,
}

impl RawTable {
    pub fn new(headers: Vec<Cell>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            headers,
            rows,
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption;
        self
    }

    /// Number of columns: the widest of the header and every row.
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }
}

/// A table after [`crate::normalize::Normalizer::normalize`].
///
/// No cell is null: former nulls hold [`crate::normalize::CELL_PLACEHOLDER`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub caption: Option<String>,
}

impl NormalizedTable {
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    /// View this table as raw input again (every cell present).
    pub fn to_raw(&self) -> RawTable {
        RawTable {
            headers: self.headers.iter().cloned().map(Some).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| r.iter().cloned().map(Some).collect())
                .collect(),
            caption: self.caption.clone(),
        }
    }
}

/// Right-aligned text grid, one line per row, header first.
impl fmt::Display for NormalizedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let line = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c:>w$}"))
                .collect::<Vec<_>>()
                .join("  ")
        };

        writeln!(f, "{}", line(&self.headers))?;
        for row in &self.rows {
            writeln!(f, "{}", line(row))?;
        }
        Ok(())
    }
}

/// One backend's normalised view of a rendered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub backend: BackendKind,
    /// May be empty when the backend found nothing.
    pub tables: Vec<NormalizedTable>,
}

/// The typed record returned by the structured-extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredTableRecord {
    /// Table identifier: underscores, no spaces.
    pub name: String,
    /// Short caption of the table.
    pub summary: String,
    /// Ordered, unique column names.
    pub columns: Vec<String>,
    /// Row mappings column → value.
    pub data: Vec<RecordRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Cell {
        Some(v.to_string())
    }

    #[test]
    fn width_covers_ragged_rows() {
        let t = RawTable::new(vec![s("a")], vec![vec![s("1"), s("2"), None], vec![]]);
        assert_eq!(t.width(), 3);
        assert_eq!(RawTable::default().width(), 0);
    }

    #[test]
    fn display_right_aligns_columns() {
        let t = NormalizedTable {
            headers: vec!["Segment".into(), "FY24".into()],
            rows: vec![
                vec!["Compute".into(), "47,405".into()],
                vec!["Graphics".into(), "13,517".into()],
            ],
            caption: None,
        };
        let out = t.to_string();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], " Segment    FY24");
        assert_eq!(lines[1], " Compute  47,405");
        assert_eq!(lines[2], "Graphics  13,517");
    }

    #[test]
    fn to_raw_wraps_every_cell() {
        let t = NormalizedTable {
            headers: vec!["A".into()],
            rows: vec![vec!["    ".into()]],
            caption: Some("Revenue by segment".into()),
        };
        let raw = t.to_raw();
        assert_eq!(raw.headers, vec![s("A")]);
        assert_eq!(raw.rows, vec![vec![s("    ")]]);
        assert_eq!(raw.caption.as_deref(), Some("Revenue by segment"));
    }

    #[test]
    fn record_deserialises_from_model_json() {
        let json = r#"{
            "name": "revenue_by_segment",
            "summary": "Revenue by reportable segment",
            "columns": ["segment", "fy2024"],
            "data": [{"segment": "Compute", "fy2024": 47405}]
        }"#;
        let r: StructuredTableRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.columns.len(), 2);
        assert_eq!(r.data[0]["fy2024"], serde_json::json!(47405));
    }
}
