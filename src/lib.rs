//! # edgequake-tablex
//!
//! Pull the tables out of an HTML filing (10-K, 10-Q, …), cross-check them
//! through two PDF table extractors, and optionally turn them into typed
//! records with a vision LLM and store them in PostgreSQL.
//!
//! ## Why this crate?
//!
//! Filing tables are built for printing, not for parsing: spacer columns,
//! `$` signs in their own cells, headers stacked three rows deep. Reading the
//! markup alone gets the structure wrong; reading a picture alone loses the
//! exact digits. This crate produces all views of every table (markup, two
//! independent PDF extractions, a rendered image), cleans each with the same
//! [`Normalizer`], and lets an operator decide at checkpoints which tables are
//! worth sending to a model and saving.
//!
//! ## Pipeline Overview
//!
//! ```text
//! filing (path or URL)
//!  │
//!  ├─ 1. Locate     every <table>, its caption, parsed + normalised
//!  ├─ 2. Render     table → PDF (WeasyPrint) and PNG (pdfium)
//!  ├─ 3. Extract    PDF → tables via pdfium text layout and tabula
//!  ├─ 4. Normalise  one Normalizer, a variant per backend
//!  ├─ 5. Review     checkpoint at the pause marker (ReviewGate)
//!  ├─ 6. Structure  vision LLM → StructuredTableRecord → document.json
//!  └─ 7. Persist    record → new PostgreSQL table
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_tablex::{NoReview, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .ticker("nvda")
//!         .tabula_jar("/opt/tabula/tabula.jar")
//!         .build()?;
//!     let pipeline = Pipeline::from_config(config).await?;
//!     let report = pipeline.run("nvda-20240128.htm", &mut NoReview).await?;
//!     eprintln!("{} tables, {} clean", report.total_tables, report.clean_tables());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tablex` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-tablex = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Needed for | Configure with |
//! |------|------------|----------------|
//! | WeasyPrint | rendering | `weasyprint_bin` |
//! | pdfium | PNG + pdfium backend | `pdfium_lib_dir` / `PDFIUM_LIB_PATH` |
//! | Java + tabula-java jar | tabula backend | `java_bin`, `tabula_jar` |
//! | LLM API key | structured extraction | `OPENAI_API_KEY`, … |
//! | PostgreSQL | persistence | `database_url` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod normalize;
pub mod orchestrate;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod review;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BackendKind, PipelineConfig, PipelineConfigBuilder};
pub use error::{TableError, TablexError};
pub use normalize::{flatten_stacked_header, Normalizer, CELL_PLACEHOLDER, HEADER_PLACEHOLDER};
pub use orchestrate::{load_filing, Filing, Pipeline, PipelineBuilder, RunReport, TableOutcome};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use review::{Checkpoint, CheckpointDecision, NoReview, PauseMarker, ReviewGate};
pub use table::{
    BackendOutput, Cell, NormalizedTable, RawTable, StructuredTableRecord, TableFragment,
};
