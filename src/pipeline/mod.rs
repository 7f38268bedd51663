//! Pipeline stages for table extraction.
//!
//! Each submodule implements exactly one transformation step, and every step
//! with side effects sits behind a trait so the orchestrator can be driven
//! with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ locate ──▶ render ──▶ backends ──▶ (checkpoint) ──▶ structure ──▶ persist
//! (URL/path) (scraper) (weasyprint  (pdfium,                    (vision LLM)   (postgres)
//!                       + pdfium)    tabula)
//! ```
//!
//! 1. [`input`]    — canonicalise the user-supplied path or URL to a local file
//! 2. [`locate`]   — find every `<table>`, its caption, and parse it into a grid
//! 3. [`render`]   — HTML fragment → PDF (WeasyPrint) and PNG (pdfium);
//!    blocking, runs in `spawn_blocking`
//! 4. [`backends`] — re-extract tables from the rendered PDF; blocking
//! 5. [`encode`]   — base64-wrap the PNG for the multimodal request body
//! 6. [`structure`] — the only stage talking to a model
//! 7. [`postprocess`] — deterministic cleanup of the model's JSON answer
//! 8. [`persist`]  — write the record's rows to PostgreSQL

pub mod backends;
pub mod encode;
pub mod input;
pub mod locate;
pub mod persist;
pub mod postprocess;
pub mod render;
pub mod structure;
