//! PDF table-extraction backends.
//!
//! Each rendered table PDF is read back by independent extractors. Their
//! outputs are never reconciled with each other or with the markup table:
//! divergence between them is exactly what the operator looks at during a
//! review checkpoint.
//!
//! Every backend labels the columns it cannot name with its own scheme
//! ([`BackendKind::placeholder_name`]) so that the matching
//! [`crate::normalize::Normalizer::for_backend`] can recognise them.

pub mod pdfium;
pub mod tabula;

use crate::config::{BackendKind, PipelineConfig};
use crate::error::TablexError;
use crate::table::{Cell, RawTable};
use std::path::Path;
use std::sync::Arc;

/// Extracts tables from a PDF file. Blocking.
pub trait TableExtractor: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// All tables found in `pdf`, in page order.
    fn extract(&self, pdf: &Path) -> Result<Vec<RawTable>, TablexError>;
}

/// The extractors named in `config.backends`, in order.
pub fn build_extractors(
    config: &PipelineConfig,
) -> Result<Vec<Arc<dyn TableExtractor>>, TablexError> {
    config
        .backends
        .iter()
        .map(|kind| -> Result<Arc<dyn TableExtractor>, TablexError> {
            Ok(match kind {
                BackendKind::Pdfium => Arc::new(pdfium::PdfiumExtractor::from_config(config)),
                BackendKind::Tabula => Arc::new(tabula::TabulaExtractor::from_config(config)?),
            })
        })
        .collect()
}

/// Split a grid into header and body the way both backends do: the first
/// row is the header, and each empty header cell gets the backend's
/// auto-generated name.
pub(crate) fn header_from_first_row(kind: BackendKind, mut grid: Vec<Vec<Cell>>) -> Option<RawTable> {
    if grid.is_empty() {
        return None;
    }
    let first = grid.remove(0);
    let width = grid
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(first.len()))
        .max()
        .unwrap_or(0);
    let headers = (0..width)
        .map(|i| match first.get(i).cloned().flatten() {
            Some(label) if !label.trim().is_empty() => Some(label),
            _ => Some(kind.placeholder_name(i)),
        })
        .collect();
    Some(RawTable::new(headers, grid))
}
