//! Table normalisation: one cleaning pass shared by every table source.
//!
//! Markup tables and both PDF backends produce the same kind of mess: columns
//! that exist only because of layout (spacer cells, colspan fallout), pairs of
//! identical adjacent columns, and holes. [`Normalizer`] removes those in a
//! fixed order and fills what is left so the table renders with visible
//! blank cells.
//!
//! The only difference between sources is how a backend names the columns it
//! could not label (`Col3`, `Unnamed: 3`). That name pattern is the single
//! parameter of the normaliser.
//!
//! ## Order of passes
//!
//! 1. whitespace-only cells become null; ragged rows are padded
//! 2. rows null in every column are dropped
//! 3. columns with an unlabeled (or auto-named) header *and* only nulls are dropped
//! 4. a column identical to its left neighbour is dropped
//! 5. auto-generated header names are blanked, nulls are filled
//! 6. repeated real labels get `.1`, `.2`, ... suffixes
//!
//! Filling comes last: filling first would make a droppable column look
//! populated.

use crate::config::BackendKind;
use crate::table::{Cell, NormalizedTable, RawTable};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Text placed in every null cell of a normalised table.
pub const CELL_PLACEHOLDER: &str = "    ";

/// Header text for unlabeled and auto-named columns.
pub const HEADER_PLACEHOLDER: &str = "   ";

/// Cleans a [`RawTable`] into a [`NormalizedTable`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    placeholder_header: Option<Regex>,
}

impl Normalizer {
    /// Normaliser for markup-sourced tables (no auto-generated header names).
    pub fn markup() -> Self {
        Self::default()
    }

    /// Normaliser for the output of a PDF extraction backend.
    pub fn for_backend(kind: BackendKind) -> Self {
        // The per-backend patterns are compile-time constants.
        Self::with_placeholder_pattern(kind.placeholder_pattern())
            .unwrap_or_else(|_| Self::markup())
    }

    /// Normaliser for a backend with a custom auto-generated header scheme.
    pub fn with_placeholder_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            placeholder_header: Some(Regex::new(pattern)?),
        })
    }

    /// Run every pass over `raw`. Pure; never fails.
    pub fn normalize(&self, raw: &RawTable) -> NormalizedTable {
        let width = raw.width();

        // ── Pass 1: canonical cells ──────────────────────────────────────
        let headers: Vec<Cell> = (0..width)
            .map(|i| raw.headers.get(i).cloned().flatten().and_then(canonical))
            .collect();
        let rows: Vec<Vec<Cell>> = raw
            .rows
            .iter()
            .map(|row| {
                (0..width)
                    .map(|i| row.get(i).cloned().flatten().and_then(canonical))
                    .collect()
            })
            .collect();

        // ── Pass 2: drop empty rows ──────────────────────────────────────
        let rows: Vec<Vec<Cell>> = rows
            .into_iter()
            .filter(|row| row.iter().any(Option::is_some))
            .collect();

        // ── Pass 3: drop vacuous columns ─────────────────────────────────
        let mut keep: Vec<usize> = (0..width)
            .filter(|&c| {
                let all_null = rows.iter().all(|r| r[c].is_none());
                let unlabeled = match &headers[c] {
                    None => true,
                    Some(h) => self.is_auto_named(h),
                };
                !(all_null && unlabeled)
            })
            .collect();

        // ── Pass 4: collapse adjacent duplicates ─────────────────────────
        // With no rows every column is vacuously identical; keep the headers.
        if !rows.is_empty() {
            let mut collapsed = Vec::with_capacity(keep.len());
            let mut previous: Option<usize> = None;
            for c in keep {
                let duplicate = previous
                    .map(|p| rows.iter().all(|r| r[p] == r[c]))
                    .unwrap_or(false);
                if !duplicate {
                    collapsed.push(c);
                }
                previous = Some(c);
            }
            keep = collapsed;
        }

        if keep.len() != width {
            debug!("Normalised table: {} → {} columns", width, keep.len());
        }

        // ── Pass 5: placeholders ─────────────────────────────────────────
        let headers = keep
            .iter()
            .map(|&c| match &headers[c] {
                None => HEADER_PLACEHOLDER.to_string(),
                Some(h) => self.blank_auto_names(h),
            })
            .collect();
        let headers = dedupe_labels(headers);
        let rows = rows
            .iter()
            .map(|r| {
                keep.iter()
                    .map(|&c| {
                        r[c].clone()
                            .unwrap_or_else(|| CELL_PLACEHOLDER.to_string())
                    })
                    .collect()
            })
            .collect();

        NormalizedTable {
            headers,
            rows,
            caption: raw.caption.clone(),
        }
    }

    /// Header names generated by the backend start with a pattern match.
    fn is_auto_named(&self, header: &str) -> bool {
        self.placeholder_header
            .as_ref()
            .and_then(|re| re.find(header))
            .is_some_and(|m| m.start() == 0)
    }

    fn blank_auto_names(&self, header: &str) -> String {
        let blanked = match &self.placeholder_header {
            Some(re) => re.replace_all(header, HEADER_PLACEHOLDER).into_owned(),
            None => header.to_string(),
        };
        if blanked.trim().is_empty() {
            HEADER_PLACEHOLDER.to_string()
        } else {
            blanked
        }
    }
}

/// Merge a stacked header with the first body row.
///
/// For every position `i`, the first row's cell `i` is appended to header `i`
/// with a space in between; that row is then removed from the body.
/// `["Revenue", "Revenue"]` over `["2023", "2024"]` becomes
/// `["Revenue 2023", "Revenue 2024"]`. Tables without body rows are returned
/// unchanged.
pub fn flatten_stacked_header(raw: &RawTable) -> RawTable {
    let Some((first, rest)) = raw.rows.split_first() else {
        return raw.clone();
    };

    let width = raw.width();
    let headers = (0..width)
        .map(|i| {
            let head = raw.headers.get(i).cloned().flatten().and_then(canonical);
            let below = first.get(i).cloned().flatten().and_then(canonical);
            match (head, below) {
                (Some(h), Some(b)) => Some(format!("{h} {b}")),
                (h, None) => h,
                (None, b) => b,
            }
        })
        .collect();

    RawTable {
        headers,
        rows: rest.to_vec(),
        caption: raw.caption.clone(),
    }
}

/// Rename repeated labels the way data-frame readers do: `X`, `X.1`, `X.2`.
/// Placeholder headers may repeat.
fn dedupe_labels(headers: Vec<String>) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|header| {
            if header == HEADER_PLACEHOLDER {
                return header;
            }
            let mut name = header;
            let mut seen = counts.get(&name).copied().unwrap_or(0);
            while seen > 0 {
                counts.insert(name.clone(), seen + 1);
                name = format!("{name}.{seen}");
                seen = counts.get(&name).copied().unwrap_or(0);
            }
            counts.insert(name.clone(), seen + 1);
            name
        })
        .collect()
}

fn canonical(text: String) -> Cell {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Cell {
        Some(v.to_string())
    }

    fn col_table(headers: Vec<Cell>, columns: Vec<Vec<Cell>>) -> RawTable {
        let height = columns.iter().map(Vec::len).max().unwrap_or(0);
        let rows = (0..height)
            .map(|r| columns.iter().map(|c| c[r].clone()).collect())
            .collect();
        RawTable::new(headers, rows)
    }

    #[test]
    fn literal_fixture_drops_unlabeled_empty_column() {
        let raw = RawTable::new(
            vec![None, s("Col2")],
            vec![vec![s(""), None], vec![None, s("2")]],
        );
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec!["Col2".to_string()]);
        assert_eq!(out.rows, vec![vec!["2".to_string()]]);
    }

    #[test]
    fn labeled_empty_column_is_kept() {
        let raw = RawTable::new(
            vec![s("Segment"), s("Notes")],
            vec![vec![s("Compute"), None], vec![s("Graphics"), None]],
        );
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec!["Segment", "Notes"]);
        assert_eq!(out.rows[0][1], CELL_PLACEHOLDER);
    }

    #[test]
    fn unlabeled_column_with_data_is_kept() {
        let raw = RawTable::new(vec![None, s("B")], vec![vec![s("$"), s("10")]]);
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec![HEADER_PLACEHOLDER, "B"]);
        assert_eq!(out.rows, vec![vec!["$".to_string(), "10".to_string()]]);
    }

    #[test]
    fn drops_rows_that_are_entirely_null() {
        let raw = RawTable::new(
            vec![s("A"), s("B")],
            vec![vec![None, s("  ")], vec![s("1"), s("2")], vec![]],
        );
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0], vec!["1", "2"]);
    }

    #[test]
    fn adjacent_identical_columns_collapse() {
        let a = vec![s("1"), s("2")];
        let b = vec![s("3"), s("4")];
        let raw = col_table(vec![s("x"), s("y"), s("z")], vec![a.clone(), a, b]);
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec!["x", "z"]);
        assert_eq!(out.rows, vec![vec!["1", "3"], vec!["2", "4"]]);
    }

    #[test]
    fn non_adjacent_identical_columns_survive() {
        let a = vec![s("1"), s("2")];
        let b = vec![s("3"), s("4")];
        let raw = col_table(vec![s("x"), s("y"), s("z")], vec![a.clone(), b, a]);
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.width(), 3);
    }

    #[test]
    fn repeated_labels_get_suffixes() {
        let raw = RawTable::new(
            vec![None, s("Revenue"), None, s("Revenue")],
            vec![vec![s("$"), s("1"), s("%"), s("2")]],
        );
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(
            out.headers,
            vec![HEADER_PLACEHOLDER, "Revenue", HEADER_PLACEHOLDER, "Revenue.1"]
        );
        let labels: Vec<_> = out
            .headers
            .iter()
            .filter(|h| h.as_str() != HEADER_PLACEHOLDER)
            .collect();
        let unique: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let raw = RawTable::new(
            vec![s("A"), s("A.1"), s("A")],
            vec![vec![s("1"), s("2"), s("3")]],
        );
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec!["A", "A.1", "A.1.1"]);
        assert_eq!(Normalizer::markup().normalize(&out.to_raw()), out);
    }

    #[test]
    fn runs_of_duplicates_collapse_to_one() {
        let a = vec![s("1"), None];
        let b = vec![None, s("5")];
        let raw = col_table(
            vec![s("x"), s("x"), s("x"), s("y")],
            vec![a.clone(), a.clone(), a, b],
        );
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec!["x", "y"]);
        assert_eq!(out.rows[1][0], CELL_PLACEHOLDER);
    }

    #[test]
    fn header_only_table_keeps_all_headers() {
        let raw = RawTable::new(vec![s("A"), s("B")], vec![]);
        let out = Normalizer::markup().normalize(&raw);
        assert_eq!(out.headers, vec!["A", "B"]);
        assert!(out.rows.is_empty());
    }

    #[test]
    fn no_null_survives_normalisation() {
        let raw = RawTable::new(
            vec![s("A"), s("B"), s("C")],
            vec![vec![s("1"), None, None], vec![None, s("2"), None]],
        );
        let out = Normalizer::markup().normalize(&raw);
        for row in &out.rows {
            assert_eq!(row.len(), out.width());
        }
        assert_eq!(out.rows[0][1], CELL_PLACEHOLDER);
        assert_eq!(out.rows[1][0], CELL_PLACEHOLDER);
    }

    #[test]
    fn pdfium_variant_drops_and_blanks_auto_columns() {
        let raw = RawTable::new(
            vec![s("Col0"), s("Col1"), s("FY24")],
            vec![vec![s("Revenue"), None, s("60,922")], vec![s("Cost"), None, s("16,621")]],
        );
        let out = Normalizer::for_backend(BackendKind::Pdfium).normalize(&raw);
        assert_eq!(out.headers, vec![HEADER_PLACEHOLDER, "FY24"]);
        assert_eq!(out.rows[0], vec!["Revenue", "60,922"]);
    }

    #[test]
    fn tabula_variant_uses_its_own_pattern() {
        let raw = RawTable::new(
            vec![s("Unnamed: 0"), s("Col1"), s("Total")],
            vec![vec![None, None, s("5")]],
        );
        let out = Normalizer::for_backend(BackendKind::Tabula).normalize(&raw);
        // "Col1" is a real label for tabula and survives even though empty.
        assert_eq!(out.headers, vec!["Col1", "Total"]);
        assert_eq!(out.rows[0], vec![CELL_PLACEHOLDER, "5"]);
    }

    #[test]
    fn auto_name_must_start_the_header() {
        let raw = RawTable::new(vec![s("Total Col3")], vec![vec![None], vec![None]]);
        let out = Normalizer::for_backend(BackendKind::Pdfium).normalize(&raw);
        // not auto-named, so the empty column stays; the match is still blanked
        assert_eq!(out.width(), 1);
        assert_eq!(out.headers[0], "Total    ");
    }

    #[test]
    fn custom_pattern() {
        let n = Normalizer::with_placeholder_pattern(r"^field_\d+$").unwrap();
        let raw = RawTable::new(vec![s("field_1"), s("x")], vec![vec![None, s("1")]]);
        let out = n.normalize(&raw);
        assert_eq!(out.headers, vec!["x"]);
        assert!(Normalizer::with_placeholder_pattern("(").is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let fixtures = vec![
            RawTable::new(
                vec![None, s("Col2"), s("Col3"), None],
                vec![
                    vec![s("a"), None, None, s("a")],
                    vec![None, s("x"), s("x"), None],
                    vec![None, None, None, None],
                ],
            ),
            RawTable::new(
                vec![s("Unnamed: 0"), s("Q1"), s("Q1")],
                vec![vec![None, s("1"), s("1")], vec![s(" "), s("2"), s("2")]],
            ),
            RawTable::new(vec![s("A"), s("B")], vec![]),
            RawTable::new(
                vec![s("Total"), s("Col1"), s("Total"), s("Col4")],
                vec![vec![s("1"), s("x"), s("2"), s("y")]],
            ),
        ];
        for n in [
            Normalizer::markup(),
            Normalizer::for_backend(BackendKind::Pdfium),
            Normalizer::for_backend(BackendKind::Tabula),
        ] {
            for raw in &fixtures {
                let once = n.normalize(raw);
                let twice = n.normalize(&once.to_raw());
                assert_eq!(once, twice, "not idempotent for {raw:?}");
            }
        }
    }

    #[test]
    fn caption_is_carried() {
        let raw = RawTable::new(vec![s("A")], vec![vec![s("1")]])
            .with_caption(Some("Table 1".into()));
        assert_eq!(
            Normalizer::markup().normalize(&raw).caption.as_deref(),
            Some("Table 1")
        );
    }

    #[test]
    fn flatten_merges_header_with_first_row() {
        let raw = RawTable::new(
            vec![s("Revenue"), s("Revenue")],
            vec![vec![s("2023"), s("2024")], vec![s("26,974"), s("60,922")]],
        );
        let flat = flatten_stacked_header(&raw);
        assert_eq!(flat.headers, vec![s("Revenue 2023"), s("Revenue 2024")]);
        assert_eq!(flat.rows, vec![vec![s("26,974"), s("60,922")]]);
    }

    #[test]
    fn flatten_handles_missing_sides() {
        let raw = RawTable::new(
            vec![None, s("Total"), s("")],
            vec![vec![s("Segment"), None, s("%")]],
        );
        let flat = flatten_stacked_header(&raw);
        assert_eq!(flat.headers, vec![s("Segment"), s("Total"), s("%")]);
        assert!(flat.rows.is_empty());
    }

    #[test]
    fn flatten_without_body_is_identity() {
        let raw = RawTable::new(vec![s("A")], vec![]);
        assert_eq!(flatten_stacked_header(&raw), raw);
    }
}
