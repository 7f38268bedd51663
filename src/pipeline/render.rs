//! Table rendering: HTML fragment → PDF (WeasyPrint) and PNG (pdfium).
//!
//! ## Why WeasyPrint for the PDF?
//!
//! The extraction backends need a PDF whose text layer matches the table's
//! visual layout. WeasyPrint lays out HTML/CSS the way a print preview does
//! and writes real text (not outlines), which is exactly what pdfium's text
//! segments and tabula's stream mode read back.
//!
//! ## Why pdfium for the PNG?
//!
//! WeasyPrint dropped PNG output in v53. Rasterising the PDF we just wrote
//! keeps the image pixel-identical to what the backends saw. Multi-page
//! tables are stacked top to bottom into one image so the model sees the
//! whole table at once.
//!
//! Everything here is blocking (subprocess + pdfium). The orchestrator calls
//! the renderer inside `tokio::task::spawn_blocking`.

use crate::config::PipelineConfig;
use crate::error::TablexError;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Stylesheet wrapped around each fragment before rendering.
///
/// Filings size tables for a browser window; without `max-width` and
/// `page-break-inside: avoid` wide tables overflow the page and long ones
/// split mid-row.
pub const DEFAULT_STYLESHEET: &str = r#"<head>
<style>
body {
    margin: 0;
    padding: 0;
    max-width: 100%;
    vertical-align: text-top;
}
div {
    background-color: white;
    max-width: 100%;
    padding: 2%;
}
table {
    border-collapse: collapse;
    table-layout: auto;
    max-width: 98%;
    page-break-inside: avoid;
    white-space: normal;
    background-color: white;
}
th, tr, td, tbody {
    max-width: 98%;
    word-wrap: break-word;
}
</style>
</head>"#;

/// Wrap a table fragment in a standalone document with `head`.
pub fn wrap_with_css(fragment: &str, head: &str) -> String {
    format!("<html>{head}\n<body><div>{fragment}</div></body></html>")
}

/// Renders one table fragment to files.
///
/// Implementations are blocking and must be shareable across the blocking
/// thread pool.
pub trait TableRenderer: Send + Sync {
    /// Render `html` to a PDF document at `out`.
    fn render_pdf(&self, html: &str, out: &Path) -> Result<(), TablexError>;

    /// Render `html` to a PNG image at `out`.
    fn render_image(&self, html: &str, out: &Path) -> Result<(), TablexError>;
}

/// Bind to the pdfium shared library.
///
/// Tries `lib_dir` (or the current directory) first, then the system loader.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, TablexError> {
    let dir = lib_dir.unwrap_or_else(|| Path::new("./"));
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| TablexError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// WeasyPrint CLI for PDFs, pdfium for rasterising them.
#[derive(Debug, Clone)]
pub struct WeasyPrintRenderer {
    bin: PathBuf,
    dpi: u32,
    /// `<head>` wrapped around fragments; `None` renders the fragment as-is.
    head: Option<String>,
    pdfium_lib_dir: Option<PathBuf>,
}

impl WeasyPrintRenderer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let head = config.override_css.then(|| {
            config
                .stylesheet
                .clone()
                .unwrap_or_else(|| DEFAULT_STYLESHEET.to_string())
        });
        Self {
            bin: config.weasyprint_bin.clone(),
            dpi: config.dpi,
            head,
            pdfium_lib_dir: config.pdfium_lib_dir.clone(),
        }
    }

    /// The document actually handed to WeasyPrint.
    fn document(&self, html: &str) -> String {
        match &self.head {
            Some(head) => wrap_with_css(html, head),
            None => html.to_string(),
        }
    }

    fn rasterise(&self, pdf: &Path, out: &Path) -> Result<(), TablexError> {
        let render_err = |detail: String| TablexError::Render { detail };

        let pdfium = bind_pdfium(self.pdfium_lib_dir.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| render_err(format!("cannot open rendered PDF: {:?}", e)))?;

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.dpi as f32 / 72.0);

        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| render_err(format!("page {}: {:?}", idx + 1, e)))?;
            pages.push(bitmap.as_image());
        }

        let image = stack_pages(&pages)
            .ok_or_else(|| render_err("rendered PDF has no pages".to_string()))?;
        debug!(
            "Rasterised {} page(s) → {}x{} px",
            pages.len(),
            image.width(),
            image.height()
        );

        image
            .save_with_format(out, ImageFormat::Png)
            .map_err(|e| render_err(format!("cannot write {}: {}", out.display(), e)))
    }
}

impl TableRenderer for WeasyPrintRenderer {
    fn render_pdf(&self, html: &str, out: &Path) -> Result<(), TablexError> {
        let render_err = |detail: String| TablexError::Render { detail };

        let mut input = tempfile::Builder::new()
            .suffix(".html")
            .tempfile()
            .map_err(|e| render_err(e.to_string()))?;
        std::io::Write::write_all(&mut input, self.document(html).as_bytes())
            .map_err(|e| render_err(e.to_string()))?;

        let output = Command::new(&self.bin)
            .arg(input.path())
            .arg(out)
            .output()
            .map_err(|e| {
                render_err(format!(
                    "failed to execute {}: {}",
                    self.bin.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(render_err(format!(
                "weasyprint exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!("Rendered PDF: {}", out.display());
        Ok(())
    }

    fn render_image(&self, html: &str, out: &Path) -> Result<(), TablexError> {
        let scratch = tempfile::tempdir().map_err(|e| TablexError::Render {
            detail: e.to_string(),
        })?;
        let pdf = scratch.path().join("table.pdf");
        self.render_pdf(html, &pdf)?;
        self.rasterise(&pdf, out)
    }
}

/// Stack page images top to bottom on a white canvas.
///
/// Returns `None` when there are no pages.
pub fn stack_pages(pages: &[DynamicImage]) -> Option<DynamicImage> {
    match pages {
        [] => None,
        [single] => Some(single.clone()),
        _ => {
            let width = pages.iter().map(DynamicImage::width).max().unwrap_or(0);
            let height = pages.iter().map(DynamicImage::height).sum();
            let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
            let mut y: i64 = 0;
            for page in pages {
                image::imageops::overlay(&mut canvas, &page.to_rgba8(), 0, y);
                y += i64::from(page.height());
            }
            Some(DynamicImage::ImageRgba8(canvas))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_puts_fragment_inside_div() {
        let doc = wrap_with_css("<table></table>", DEFAULT_STYLESHEET);
        assert!(doc.starts_with("<html><head>"));
        assert!(doc.contains("<body><div><table></table></div></body></html>"));
        assert!(doc.contains("page-break-inside: avoid"));
    }

    #[test]
    fn override_css_off_renders_fragment_as_is() {
        let config = PipelineConfig::builder()
            .override_css(false)
            .backends(vec![])
            .build()
            .unwrap();
        let r = WeasyPrintRenderer::from_config(&config);
        assert_eq!(r.document("<table></table>"), "<table></table>");
    }

    #[test]
    fn custom_stylesheet_replaces_default() {
        let config = PipelineConfig::builder()
            .stylesheet("<head><style>td{}</style></head>")
            .backends(vec![])
            .build()
            .unwrap();
        let r = WeasyPrintRenderer::from_config(&config);
        let doc = r.document("<table></table>");
        assert!(doc.contains("td{}"));
        assert!(!doc.contains("border-collapse"));
    }

    #[test]
    fn missing_weasyprint_is_a_render_error() {
        let config = PipelineConfig::builder()
            .weasyprint_bin("/nonexistent/weasyprint")
            .backends(vec![])
            .build()
            .unwrap();
        let r = WeasyPrintRenderer::from_config(&config);
        let dir = tempfile::tempdir().unwrap();
        let err = r
            .render_pdf("<table></table>", &dir.path().join("0.pdf"))
            .unwrap_err();
        assert!(matches!(err, TablexError::Render { .. }), "got {err:?}");
    }

    #[test]
    fn stack_pages_sums_heights() {
        let a = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 4, Rgba([0, 0, 0, 255])));
        let b = DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 3, Rgba([0, 0, 0, 255])));
        let out = stack_pages(&[a, b]).unwrap();
        assert_eq!((out.width(), out.height()), (10, 7));

        // area right of the narrower page stays white
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(9, 5), &Rgba([255, 255, 255, 255]));
        assert_eq!(rgba.get_pixel(0, 5), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn stack_pages_empty() {
        assert!(stack_pages(&[]).is_none());
    }
}
