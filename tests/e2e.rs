//! End-to-end integration tests for edgequake-tablex.
//!
//! These tests run the real collaborators: WeasyPrint, pdfium, tabula-java
//! and a live LLM API. They are gated behind the `E2E_ENABLED` environment
//! variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! The tabula test also needs `TABULA_JAR`; the structuring test needs an API
//! key (`OPENAI_API_KEY`, …).

use edgequake_tablex::pipeline::render::{TableRenderer, WeasyPrintRenderer};
use edgequake_tablex::pipeline::structure::{TableStructurer, VisionStructurer};
use edgequake_tablex::{
    BackendKind, Checkpoint, CheckpointDecision, NoReview, Pipeline, PipelineConfig, ReviewGate,
    StructuredTableRecord,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

fn sample_filing() -> String {
    test_cases_dir()
        .join("filing_sample.htm")
        .display()
        .to_string()
}

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    }};
}

fn base_config(backends: Vec<BackendKind>) -> edgequake_tablex::PipelineConfigBuilder {
    let mut builder = PipelineConfig::builder()
        .ticker("e2e")
        .output_root(output_dir())
        .backends(backends);
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        builder = builder.pdfium_lib_dir(dir);
    }
    if let Ok(jar) = std::env::var("TABULA_JAR") {
        builder = builder.tabula_jar(jar);
    }
    builder
}

/// Pauses at table 0, structures it, never pauses again, never persists.
struct StructureFirst;

impl ReviewGate for StructureFirst {
    fn first_pause(&mut self) -> Option<usize> {
        Some(0)
    }

    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> CheckpointDecision {
        CheckpointDecision {
            next_pause: Some(checkpoint.total),
            structure: true,
        }
    }

    fn confirm_persist(&mut self, _record: &StructuredTableRecord) -> bool {
        false
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

#[test]
fn test_render_pdf_and_png() {
    e2e_skip_unless_enabled!();

    let config = base_config(vec![]).build().unwrap();
    let renderer = WeasyPrintRenderer::from_config(&config);
    let html = "<table><tr><th>Segment</th><th>FY2024</th></tr>\
                <tr><td>Graphics</td><td>13,517</td></tr></table>";

    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("t.pdf");
    let png = dir.path().join("t.png");
    renderer.render_pdf(html, &pdf).expect("WeasyPrint render");
    renderer.render_image(html, &png).expect("PNG render");

    assert!(std::fs::read(&pdf).unwrap().starts_with(b"%PDF"));
    let img = image::open(&png).expect("valid PNG");
    assert!(img.width() > 0 && img.height() > 0);
}

// ── Backends ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pdfium_backend_reads_rendered_tables() {
    e2e_skip_unless_enabled!();

    let config = base_config(vec![BackendKind::Pdfium]).build().unwrap();
    let pipeline = Pipeline::from_config(config).await.unwrap();
    let report = pipeline.run(&sample_filing(), &mut NoReview).await.unwrap();

    assert_eq!(report.total_tables, 3);
    let first = &report.outcomes[0];
    assert!(first.pdf_path.is_some(), "errors: {:?}", first.errors);
    let pdfium = &first.backend_outputs[0];
    assert_eq!(pdfium.backend, BackendKind::Pdfium);
    let text: String = pdfium
        .tables
        .iter()
        .map(|t| t.to_string())
        .collect();
    assert!(text.contains("Graphics"), "pdfium saw:\n{text}");
}

#[tokio::test]
async fn test_tabula_backend() {
    e2e_skip_unless_enabled!();
    if std::env::var("TABULA_JAR").is_err() {
        println!("SKIP — set TABULA_JAR to run the tabula test");
        return;
    }

    let config = base_config(vec![BackendKind::Tabula]).build().unwrap();
    let pipeline = Pipeline::from_config(config).await.unwrap();
    let report = pipeline.run(&sample_filing(), &mut NoReview).await.unwrap();

    let tabula = &report.outcomes[0].backend_outputs[0];
    assert_eq!(tabula.backend, BackendKind::Tabula);
    assert!(!tabula.tables.is_empty());
}

// ── Structured extraction ────────────────────────────────────────────────────

#[tokio::test]
async fn test_structure_first_table() {
    e2e_skip_unless_enabled!();

    let config = base_config(vec![]).build().unwrap();
    if VisionStructurer::from_config(&config).is_err() {
        println!("SKIP — no LLM provider configured");
        return;
    }
    let pipeline = Pipeline::from_config(config).await.unwrap();
    let report = pipeline
        .run(&sample_filing(), &mut StructureFirst)
        .await
        .unwrap();

    let record = report.outcomes[0].record.as_ref().expect("record");
    assert!(!record.name.contains(' '));
    assert!(!record.columns.is_empty());
    assert!(!record.data.is_empty());
    assert!(output_dir()
        .join("e2e/0/image/document.json")
        .is_file());
}

#[tokio::test]
async fn test_structure_text_only() {
    e2e_skip_unless_enabled!();

    let config = base_config(vec![]).build().unwrap();
    let Ok(structurer) = VisionStructurer::from_config(&config) else {
        println!("SKIP — no LLM provider configured");
        return;
    };
    let record = structurer
        .structure_text("Segment   FY2024\nGraphics  13,517\nCompute   47,405\n")
        .await
        .unwrap();
    assert_eq!(record.data.len(), 2);
}

// ── Report ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_report_json_serialisable() {
    e2e_skip_unless_enabled!();

    let config = base_config(vec![BackendKind::Pdfium]).build().unwrap();
    let pipeline = Pipeline::from_config(config).await.unwrap();
    let report = pipeline.run(&sample_filing(), &mut NoReview).await.unwrap();

    let json = serde_json::to_string_pretty(&report).unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["total_tables"], 3);
    assert_eq!(v["outcomes"][0]["backend_outputs"][0]["backend"], "pdfium");
}
