//! tabula-java backend.
//!
//! Runs `java -jar tabula.jar --format JSON --pages all --silent <pdf>` and
//! reads its table list. tabula guesses the extraction method per page
//! (lattice when ruling lines exist, stream otherwise), which makes it a
//! useful second opinion next to the purely geometric pdfium backend.

use super::{header_from_first_row, TableExtractor};
use crate::config::{BackendKind, PipelineConfig};
use crate::error::TablexError;
use crate::table::{Cell, RawTable};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// One table in tabula's JSON output.
#[derive(Debug, Deserialize)]
struct TabulaTable {
    #[serde(default)]
    data: Vec<Vec<TabulaCell>>,
}

#[derive(Debug, Deserialize)]
struct TabulaCell {
    #[serde(default)]
    text: String,
}

/// Parse tabula's `--format JSON` output.
pub fn parse_tabula_json(json: &str) -> Result<Vec<RawTable>, serde_json::Error> {
    let tables: Vec<TabulaTable> = serde_json::from_str(json)?;
    Ok(tables
        .into_iter()
        .filter_map(|t| {
            let grid: Vec<Vec<Cell>> = t
                .data
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|c| {
                            let text = c.text.trim();
                            (!text.is_empty()).then(|| text.replace('\r', " "))
                        })
                        .collect()
                })
                .collect();
            header_from_first_row(BackendKind::Tabula, grid)
        })
        .collect())
}

/// Runs tabula-java in a subprocess.
#[derive(Debug, Clone)]
pub struct TabulaExtractor {
    java: PathBuf,
    jar: PathBuf,
}

impl TabulaExtractor {
    pub fn new(java: impl Into<PathBuf>, jar: impl Into<PathBuf>) -> Self {
        Self {
            java: java.into(),
            jar: jar.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, TablexError> {
        let jar = config.tabula_jar.clone().ok_or_else(|| {
            TablexError::InvalidConfig("the tabula backend needs --tabula-jar".into())
        })?;
        Ok(Self::new(config.java_bin.clone(), jar))
    }
}

impl TableExtractor for TabulaExtractor {
    fn kind(&self) -> BackendKind {
        BackendKind::Tabula
    }

    fn extract(&self, pdf: &Path) -> Result<Vec<RawTable>, TablexError> {
        let backend_err = |detail: String| TablexError::Backend {
            backend: BackendKind::Tabula,
            detail,
        };

        let output = Command::new(&self.java)
            .arg("-jar")
            .arg(&self.jar)
            .args(["--format", "JSON", "--pages", "all", "--silent"])
            .arg(pdf)
            .output()
            .map_err(|e| backend_err(format!("failed to execute {}: {}", self.java.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(backend_err(format!(
                "tabula exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let tables = parse_tabula_json(&stdout)
            .map_err(|e| backend_err(format!("unreadable tabula output: {}", e)))?;
        debug!("tabula: {} → {} tables", pdf.display(), tables.len());
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Cell {
        Some(v.to_string())
    }

    const SAMPLE: &str = r#"[
      {"extraction_method":"stream","top":40.0,"left":20.0,"width":500.0,"height":80.0,"page_number":1,
       "data":[
         [{"top":40.0,"left":20.0,"width":80.0,"height":10.0,"text":""},
          {"top":40.0,"left":200.0,"width":40.0,"height":10.0,"text":"FY24"}],
         [{"top":60.0,"left":20.0,"width":80.0,"height":10.0,"text":"Compute"},
          {"top":60.0,"left":200.0,"width":40.0,"height":10.0,"text":"47,405"}],
         [{"top":80.0,"left":20.0,"width":80.0,"height":10.0,"text":"Graphics"},
          {"top":80.0,"left":200.0,"width":40.0,"height":10.0,"text":" "}]
       ]},
      {"extraction_method":"stream","data":[]}
    ]"#;

    #[test]
    fn parses_tables_with_unnamed_headers() {
        let tables = parse_tabula_json(SAMPLE).unwrap();
        assert_eq!(tables.len(), 1, "empty tables are dropped");
        let t = &tables[0];
        assert_eq!(t.headers, vec![s("Unnamed: 0"), s("FY24")]);
        assert_eq!(
            t.rows,
            vec![vec![s("Compute"), s("47,405")], vec![s("Graphics"), None]]
        );
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_tabula_json("Error: file not found").is_err());
        assert!(parse_tabula_json("[]").unwrap().is_empty());
    }

    #[test]
    fn missing_java_is_a_backend_error() {
        let ex = TabulaExtractor::new("/nonexistent/java", "/nonexistent/tabula.jar");
        let err = ex.extract(Path::new("/tmp/0.pdf")).unwrap_err();
        assert!(matches!(
            err,
            TablexError::Backend {
                backend: BackendKind::Tabula,
                ..
            }
        ));
    }

    #[test]
    fn from_config_requires_jar() {
        let config = PipelineConfig::builder()
            .backends(vec![BackendKind::Pdfium])
            .build()
            .unwrap();
        assert!(TabulaExtractor::from_config(&config).is_err());
    }
}
