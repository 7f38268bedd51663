//! Error types for the edgequake-tablex library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TablexError`] — **Fatal**: the run cannot proceed at all (missing
//!   filing, a PDF backend crashed, the model returned garbage). Returned as
//!   `Err(TablexError)` from [`crate::orchestrate::Pipeline::run`] and from
//!   collaborator constructors.
//!
//! * [`TableError`] — **Non-fatal**: one table could not be parsed, rendered
//!   or persisted, but the run moves on to the next table. Stored inside
//!   [`crate::orchestrate::TableOutcome`] so callers can see exactly which
//!   tables degraded and why.

use crate::config::BackendKind;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-tablex library.
#[derive(Debug, Error)]
pub enum TablexError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Filing not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── File system errors ────────────────────────────────────────────────
    /// Reading a file or creating an artifact directory failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write a run artifact (record JSON, report).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Rendering ─────────────────────────────────────────────────────────
    /// The renderer could not turn a fragment into a PDF or PNG.
    ///
    /// The orchestrator records this per table as
    /// [`TableError::RenderFailed`] and moves on.
    #[error("Rendering failed: {detail}")]
    Render { detail: String },

    // ── Extraction backends ───────────────────────────────────────────────
    /// A PDF table-extraction backend failed on a rendered table.
    #[error("{backend} backend failed: {detail}")]
    Backend { backend: BackendKind, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set --pdfium-lib-dir (or PDFIUM_LIB_PATH) to the directory holding libpdfium,\n\
or install pdfium where the system loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The LLM call did not answer within the configured timeout.
    #[error("LLM call timed out after {secs}s")]
    ApiTimeout { secs: u64 },

    /// The model answered, but not with a usable table record.
    #[error("Model response is not a valid table record: {detail}")]
    InvalidRecord { detail: String },

    // ── Persistence ───────────────────────────────────────────────────────
    /// Connecting to or talking with the database failed.
    #[error("Database error: {detail}")]
    Database { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TablexError {
    /// Map an `std::io::Error` on `path` to the most specific variant.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => TablexError::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => TablexError::PermissionDenied { path },
            _ => TablexError::Io { path, source },
        }
    }
}

/// A non-fatal error for a single table.
///
/// Stored in [`crate::orchestrate::TableOutcome::errors`]. The run
/// continues with the next table.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TableError {
    /// The markup fragment could not be turned into a table.
    #[error("Table {index}: unparseable markup: {reason}")]
    Unparseable { index: usize, reason: String },

    /// Rendering the fragment to an image or PDF failed.
    #[error("Table {index}: {format} rendering failed: {detail}")]
    RenderFailed {
        index: usize,
        format: String,
        detail: String,
    },

    /// Structured extraction was requested but cannot run for this table.
    #[error("Table {index}: structured extraction unavailable: {reason}")]
    StructuringUnavailable { index: usize, reason: String },

    /// Saving the structured record to the database failed.
    #[error("Table {index}: saving '{table}' failed: {detail}")]
    PersistFailed {
        index: usize,
        table: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_display_names_backend() {
        let e = TablexError::Backend {
            backend: BackendKind::Tabula,
            detail: "java exited with status 1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("tabula"), "got: {msg}");
        assert!(msg.contains("status 1"));
    }

    #[test]
    fn from_io_maps_not_found() {
        let e = TablexError::from_io(
            "/nope/filing.htm",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(e, TablexError::FileNotFound { .. }));
    }

    #[test]
    fn from_io_keeps_other_kinds() {
        let e = TablexError::from_io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad utf-8"),
        );
        assert!(matches!(e, TablexError::Io { .. }));
        assert!(e.to_string().contains("bad utf-8"));
    }

    #[test]
    fn render_failed_display() {
        let e = TableError::RenderFailed {
            index: 7,
            format: "png".into(),
            detail: "weasyprint not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Table 7"));
        assert!(msg.contains("png"));
    }

    #[test]
    fn table_error_roundtrips_through_json() {
        let e = TableError::PersistFailed {
            index: 2,
            table: "segment_revenue".into(),
            detail: "relation already exists".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: TableError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
