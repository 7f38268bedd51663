//! The per-table state machine.
//!
//! ## Flow
//!
//! ```text
//!            ┌──────────────────────────────────────────────────────────┐
//!  table i → │ mkdir → render png/pdf → backends → normalise → progress │
//!            └──────────────────────────┬───────────────────────────────┘
//!                                       │ i == pause marker?
//!                                       ▼
//!                    checkpoint → (structure → document.json → persist?)
//! ```
//!
//! Tables are processed strictly one after another; the only state carried
//! from one table to the next is the [`PauseMarker`]. Rendering and the PDF
//! backends are blocking and run in `spawn_blocking`, awaited before the next
//! step.
//!
//! ## What is fatal
//!
//! Rendering and persistence failures are recorded per table
//! ([`TableError`]) and the run moves on. Everything else (a missing filing,
//! a directory that cannot be created, a backend or model failure) aborts the
//! run with a [`TablexError`].

use crate::config::PipelineConfig;
use crate::error::{TableError, TablexError};
use crate::normalize::Normalizer;
use crate::pipeline::backends::{build_extractors, TableExtractor};
use crate::pipeline::input;
use crate::pipeline::locate::{normalize_fragments, MarkupTables, TableLocator};
use crate::pipeline::persist::{PostgresStore, RecordStore};
use crate::pipeline::render::{TableRenderer, WeasyPrintRenderer};
use crate::pipeline::structure::{write_document_json, TableStructurer, VisionStructurer};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::review::{Checkpoint, PauseMarker, ReviewGate};
use crate::table::{BackendOutput, NormalizedTable, StructuredTableRecord, TableFragment};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub index: usize,
    pub caption: Option<String>,
    /// Present when the PNG was rendered.
    pub image_path: Option<PathBuf>,
    /// Present when the PDF was rendered.
    pub pdf_path: Option<PathBuf>,
    /// The table parsed straight from the markup, if it parsed.
    pub markup: Option<NormalizedTable>,
    pub backend_outputs: Vec<BackendOutput>,
    /// Whether the run paused at this table.
    pub reviewed: bool,
    pub record: Option<StructuredTableRecord>,
    /// Rows written to the database, if the record was persisted.
    pub persisted_rows: Option<u64>,
    /// Recovered problems, in the order they happened.
    pub errors: Vec<TableError>,
}

impl TableOutcome {
    fn new(fragment: &TableFragment) -> Self {
        Self {
            index: fragment.index,
            caption: fragment.caption.clone(),
            image_path: None,
            pdf_path: None,
            markup: None,
            backend_outputs: Vec::new(),
            reviewed: false,
            record: None,
            persisted_rows: None,
            errors: Vec::new(),
        }
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ticker: String,
    pub total_tables: usize,
    /// Fragments the markup path could not parse.
    pub unparseable_markup: usize,
    /// Number of checkpoints presented to the review gate.
    pub checkpoints: usize,
    pub outcomes: Vec<TableOutcome>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Tables that finished without a recorded problem.
    pub fn clean_tables(&self) -> usize {
        self.outcomes.iter().filter(|o| o.errors.is_empty()).count()
    }

    /// Tables for which a structured record was produced.
    pub fn structured_tables(&self) -> usize {
        self.outcomes.iter().filter(|o| o.record.is_some()).count()
    }
}

/// The located tables of a filing.
#[derive(Debug, Clone)]
pub struct Filing {
    pub fragments: Vec<TableFragment>,
    pub markup: MarkupTables,
}

/// Resolve `input`, locate its tables and normalise the markup ones.
///
/// Needs no external tools; the CLI uses it for `--list-tables` and
/// `--markup-only`.
pub async fn load_filing(input: &str, config: &PipelineConfig) -> Result<Filing, TablexError> {
    let resolved = input::resolve_input(
        input,
        config.download_timeout_secs,
        config.user_agent.as_deref(),
    )
    .await?;
    let path = resolved.path().to_path_buf();
    let locator = TableLocator::new().with_captions(config.include_caption);
    let flatten = config.flatten_headers;

    // html5ever trees are not Send; parse entirely on the blocking thread.
    let filing = blocking("locate", move || -> Result<Filing, TablexError> {
        let fragments = locator.locate_file(&path)?;
        let markup = normalize_fragments(&fragments, &Normalizer::markup(), flatten);
        Ok(Filing { fragments, markup })
    })
    .await??;

    info!(
        "Filing has {} tables ({} not parseable as markup)",
        filing.fragments.len(),
        filing.markup.skipped
    );
    Ok(filing)
}

async fn blocking<T, F>(what: &str, f: F) -> Result<T, TablexError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TablexError::Internal(format!("{what} task panicked: {e}")))
}

/// A configured pipeline: the config plus its collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    renderer: Arc<dyn TableRenderer>,
    extractors: Vec<Arc<dyn TableExtractor>>,
    structurer: Option<Arc<dyn TableStructurer>>,
    store: Option<Arc<dyn RecordStore>>,
    progress: ProgressCallback,
}

impl Pipeline {
    /// Build a pipeline with the default collaborators.
    ///
    /// A missing LLM provider only disables structured extraction (the
    /// operator may never ask for it). A configured database that cannot be
    /// reached is fatal.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, TablexError> {
        let structurer: Option<Arc<dyn TableStructurer>> =
            match VisionStructurer::from_config(&config) {
                Ok(s) => Some(Arc::new(s)),
                Err(e) => {
                    warn!("Structured extraction disabled: {}", e);
                    None
                }
            };

        let store: Option<Arc<dyn RecordStore>> = match &config.database_url {
            Some(url) => Some(Arc::new(PostgresStore::connect(url).await?)),
            None => None,
        };

        let mut builder = Pipeline::builder(config);
        builder.structurer = structurer;
        builder.store = store;
        builder.build()
    }

    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            renderer: None,
            extractors: None,
            structurer: None,
            store: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every table of `input`, pausing where `gate` asks to.
    pub async fn run(
        &self,
        input: &str,
        gate: &mut dyn ReviewGate,
    ) -> Result<RunReport, TablexError> {
        let start = Instant::now();
        info!("Starting run: {} (ticker {})", input, self.config.ticker);

        // ── Step 1: Initial pause marker ─────────────────────────────────
        let mut marker = PauseMarker::new(gate.first_pause());

        // ── Step 2: Locate and normalise markup tables ───────────────────
        let filing = load_filing(input, &self.config).await?;
        let total = filing.fragments.len();
        self.progress.on_run_start(total, filing.markup.skipped);

        // ── Step 3: Tables, one at a time ────────────────────────────────
        let mut outcomes = Vec::with_capacity(total);
        let mut checkpoints = 0;
        for fragment in &filing.fragments {
            self.progress.on_table_start(fragment.index, total);
            let outcome = self
                .process_table(fragment, total, &filing.markup, &mut marker, gate)
                .await?;
            if outcome.reviewed {
                checkpoints += 1;
            }
            for e in &outcome.errors {
                self.progress
                    .on_table_error(fragment.index, total, &e.to_string());
            }
            self.progress.on_table_complete(fragment.index, total);
            outcomes.push(outcome);
        }

        let report = RunReport {
            ticker: self.config.ticker.clone(),
            total_tables: total,
            unparseable_markup: filing.markup.skipped,
            checkpoints,
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        self.progress
            .on_run_complete(report.total_tables, report.clean_tables());
        info!(
            "Run complete: {} tables, {} checkpoints, {} structured, {}ms",
            report.total_tables,
            report.checkpoints,
            report.structured_tables(),
            report.duration_ms
        );
        Ok(report)
    }

    async fn process_table(
        &self,
        fragment: &TableFragment,
        total: usize,
        markup: &MarkupTables,
        marker: &mut PauseMarker,
        gate: &mut dyn ReviewGate,
    ) -> Result<TableOutcome, TablexError> {
        let index = fragment.index;
        let mut outcome = TableOutcome::new(fragment);
        outcome.markup = markup.get(index).cloned();

        // ── Artifact directories ─────────────────────────────────────────
        let table_dir = self.config.table_dir(index);
        let image_dir = table_dir.join("image");
        let pdf_dir = table_dir.join("pdf");
        for dir in [&image_dir, &pdf_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| TablexError::Io {
                    path: dir.clone(),
                    source,
                })?;
        }

        // ── Render ───────────────────────────────────────────────────────
        let png = image_dir.join(format!("{index}.png"));
        match self.render(&fragment.html, &png, RenderFormat::Png).await? {
            Ok(()) => outcome.image_path = Some(png),
            Err(detail) => outcome.errors.push(TableError::RenderFailed {
                index,
                format: "png".into(),
                detail,
            }),
        }

        let pdf = pdf_dir.join(format!("{index}.pdf"));
        match self.render(&fragment.html, &pdf, RenderFormat::Pdf).await? {
            Ok(()) => outcome.pdf_path = Some(pdf),
            Err(detail) => outcome.errors.push(TableError::RenderFailed {
                index,
                format: "pdf".into(),
                detail,
            }),
        }

        // ── Backends ─────────────────────────────────────────────────────
        if let Some(pdf) = &outcome.pdf_path {
            for extractor in &self.extractors {
                let output = self.run_backend(extractor, pdf).await?;
                self.progress
                    .on_backend_output(index, output.backend, &output.tables);
                outcome.backend_outputs.push(output);
            }
        }

        // ── Checkpoint ───────────────────────────────────────────────────
        if !marker.is_due(index) {
            return Ok(outcome);
        }
        outcome.reviewed = true;
        let decision = gate.on_checkpoint(&Checkpoint {
            index,
            total,
            caption: outcome.caption.as_deref(),
            image: outcome.image_path.as_deref(),
            pdf: outcome.pdf_path.as_deref(),
            markup: outcome.markup.as_ref(),
            backends: &outcome.backend_outputs,
        });
        marker.advance(index, &decision);
        debug!("Table {}: next pause at {:?}", index, marker.get());

        if !decision.structure {
            return Ok(outcome);
        }

        // ── Structured extraction ────────────────────────────────────────
        let Some(record) = self.structure(&mut outcome).await? else {
            return Ok(outcome);
        };
        if let Err(e) = write_document_json(&image_dir, &record) {
            warn!("Table {}: {}", index, e);
        }

        // ── Persistence ──────────────────────────────────────────────────
        if gate.confirm_persist(&record) {
            match &self.store {
                Some(store) => match store.save(&record).await {
                    Ok(rows) => outcome.persisted_rows = Some(rows),
                    Err(e) => {
                        warn!("Table {}: {}", index, e);
                        outcome.errors.push(TableError::PersistFailed {
                            index,
                            table: record.name.clone(),
                            detail: e.to_string(),
                        });
                    }
                },
                None => outcome.errors.push(TableError::PersistFailed {
                    index,
                    table: record.name.clone(),
                    detail: "no database configured".into(),
                }),
            }
        }
        outcome.record = Some(record);
        Ok(outcome)
    }

    /// Render one artifact. The outer error is fatal, the inner one is the
    /// recovered rendering failure.
    async fn render(
        &self,
        html: &str,
        out: &Path,
        format: RenderFormat,
    ) -> Result<Result<(), String>, TablexError> {
        let renderer = Arc::clone(&self.renderer);
        let html = html.to_string();
        let path = out.to_path_buf();
        let result = blocking("render", move || match format {
            RenderFormat::Png => renderer.render_image(&html, &path),
            RenderFormat::Pdf => renderer.render_pdf(&html, &path),
        })
        .await?;

        Ok(result.map_err(|e| {
            warn!("{}: {}", out.display(), e);
            e.to_string()
        }))
    }

    async fn run_backend(
        &self,
        extractor: &Arc<dyn TableExtractor>,
        pdf: &Path,
    ) -> Result<BackendOutput, TablexError> {
        let backend = extractor.kind();
        let ex = Arc::clone(extractor);
        let path = pdf.to_path_buf();
        let raw = blocking("extract", move || ex.extract(&path)).await??;

        let normalizer = Normalizer::for_backend(backend);
        let tables = raw.iter().map(|t| normalizer.normalize(t)).collect();
        Ok(BackendOutput { backend, tables })
    }

    /// Ask the model for a record: from the image when there is one, else
    /// from the markup table's text. `None` when neither is possible.
    async fn structure(
        &self,
        outcome: &mut TableOutcome,
    ) -> Result<Option<StructuredTableRecord>, TablexError> {
        let index = outcome.index;
        let unavailable = |reason: &str| TableError::StructuringUnavailable {
            index,
            reason: reason.to_string(),
        };

        let Some(structurer) = &self.structurer else {
            outcome
                .errors
                .push(unavailable("no LLM provider configured"));
            return Ok(None);
        };

        let caption = if self.config.include_caption {
            outcome.caption.as_deref()
        } else {
            None
        };

        let record = match (&outcome.image_path, &outcome.markup) {
            (Some(image), _) => structurer.structure(image, caption).await?,
            (None, Some(table)) => {
                info!("Table {}: no image, structuring from text", index);
                structurer.structure_text(&table.to_string()).await?
            }
            (None, None) => {
                outcome
                    .errors
                    .push(unavailable("no image and no parsed markup table"));
                return Ok(None);
            }
        };
        info!(
            "Table {}: record '{}' ({} columns, {} rows)",
            index,
            record.name,
            record.columns.len(),
            record.data.len()
        );
        Ok(Some(record))
    }
}

#[derive(Debug, Clone, Copy)]
enum RenderFormat {
    Png,
    Pdf,
}

/// Builder for [`Pipeline`] with injectable collaborators.
///
/// Unset collaborators default to: WeasyPrint renderer, the extractors named
/// in the config, no structurer, no store.
pub struct PipelineBuilder {
    config: PipelineConfig,
    renderer: Option<Arc<dyn TableRenderer>>,
    extractors: Option<Vec<Arc<dyn TableExtractor>>>,
    structurer: Option<Arc<dyn TableStructurer>>,
    store: Option<Arc<dyn RecordStore>>,
}

impl PipelineBuilder {
    pub fn renderer(mut self, renderer: Arc<dyn TableRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn extractors(mut self, extractors: Vec<Arc<dyn TableExtractor>>) -> Self {
        self.extractors = Some(extractors);
        self
    }

    pub fn structurer(mut self, structurer: Arc<dyn TableStructurer>) -> Self {
        self.structurer = Some(structurer);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Pipeline, TablexError> {
        let renderer = match self.renderer {
            Some(r) => r,
            None => Arc::new(WeasyPrintRenderer::from_config(&self.config)),
        };
        let extractors = match self.extractors {
            Some(e) => e,
            None => build_extractors(&self.config)?,
        };
        let progress = self
            .config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));
        Ok(Pipeline {
            config: self.config,
            renderer,
            extractors,
            structurer: self.structurer,
            store: self.store,
            progress,
        })
    }
}
