//! Structured extraction: a table image (or text) → [`StructuredTableRecord`].
//!
//! This module turns one rendered table into a vision-model call and parses
//! the answer into a typed record. Prompt text lives in [`crate::prompts`],
//! response cleanup in [`crate::pipeline::postprocess`].
//!
//! ## Message Layout
//!
//! 1. **System message** — the record schema (or user-supplied override)
//! 2. **User message** — the instruction, with the caption as context, plus
//!    the table PNG as a base64 image attachment
//!
//! The text variant sends the aligned-text rendering of the markup table
//! instead of an image; it is used when rendering failed.
//!
//! There are no retries; a failed call aborts the run.

use crate::config::PipelineConfig;
use crate::error::TablexError;
use crate::pipeline::{encode, postprocess};
use crate::prompts::{image_prompt, text_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::table::StructuredTableRecord;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// File name of the record written next to the table image.
pub const DOCUMENT_JSON: &str = "document.json";

/// Turns a rendered table into a structured record.
pub trait TableStructurer: Send + Sync {
    /// Structure the table shown in the PNG at `image`.
    fn structure<'a>(
        &'a self,
        image: &'a Path,
        caption: Option<&'a str>,
    ) -> BoxFuture<'a, Result<StructuredTableRecord, TablexError>>;

    /// Structure a table from its aligned-text rendering.
    fn structure_text<'a>(
        &'a self,
        table_text: &'a str,
    ) -> BoxFuture<'a, Result<StructuredTableRecord, TablexError>>;
}

/// [`TableStructurer`] backed by an `edgequake-llm` vision provider.
pub struct VisionStructurer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl VisionStructurer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            options: build_options(config),
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider named by `config` and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, TablexError> {
        let provider = resolve_provider(config)?;
        info!(
            "Structured extraction ready (model: {})",
            config.model.as_deref().unwrap_or(DEFAULT_MODEL)
        );
        Ok(Self::new(provider, config))
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<StructuredTableRecord, TablexError> {
        let start = Instant::now();
        let response = timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| TablexError::ApiTimeout {
            secs: self.timeout_secs,
        })?
        .map_err(|e| TablexError::LlmApiError {
            message: e.to_string(),
        })?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        parse_record(&response.content)
    }
}

impl TableStructurer for VisionStructurer {
    fn structure<'a>(
        &'a self,
        image: &'a Path,
        caption: Option<&'a str>,
    ) -> BoxFuture<'a, Result<StructuredTableRecord, TablexError>> {
        Box::pin(async move {
            let image_data = encode::encode_png_file(image)?;
            let messages = vec![
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::user_with_images(image_prompt(caption), vec![image_data]),
            ];
            self.complete(messages).await
        })
    }

    fn structure_text<'a>(
        &'a self,
        table_text: &'a str,
    ) -> BoxFuture<'a, Result<StructuredTableRecord, TablexError>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(self.system_prompt.as_str()),
                ChatMessage::user(text_prompt(table_text)),
            ];
            self.complete(messages).await
        })
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Parse a raw model answer into a record.
pub fn parse_record(raw: &str) -> Result<StructuredTableRecord, TablexError> {
    let cleaned = postprocess::clean_json_response(raw);
    let record: StructuredTableRecord =
        serde_json::from_str(&cleaned).map_err(|e| TablexError::InvalidRecord {
            detail: format!("{e} in: {}", preview(&cleaned)),
        })?;
    Ok(postprocess::tidy_record(record))
}

fn preview(s: &str) -> String {
    const MAX: usize = 200;
    match s.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}

/// Write `record` as pretty JSON to `<dir>/document.json`.
pub fn write_document_json(
    dir: &Path,
    record: &StructuredTableRecord,
) -> Result<PathBuf, TablexError> {
    let path = dir.join(DOCUMENT_JSON);
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| TablexError::Internal(format!("record serialisation: {e}")))?;
    std::fs::write(&path, json).map_err(|source| TablexError::OutputWriteFailed {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, TablexError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TablexError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`) — used as-is.
/// 2. **Named provider + model** (`config.provider_name`) — API key read by
///    [`ProviderFactory::create_llm_provider`] from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set; the record prompt was tuned
///    against GPT-4o.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, TablexError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TablexError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_options_defaults() {
        let config = PipelineConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn parse_fenced_record() {
        let raw = "```json\n{\"name\": \"Revenue by Segment\", \"summary\": \"FY24 revenue\", \
                   \"columns\": [\"segment\", \"fy2024\", \"segment\"], \
                   \"data\": [{\"segment\": \"Compute\", \"fy2024\": 47405}]}\n```";
        let r = parse_record(raw).unwrap();
        assert_eq!(r.name, "Revenue_by_Segment");
        assert_eq!(r.columns, vec!["segment", "fy2024"]);
        assert_eq!(r.data[0]["fy2024"], json!(47405));
    }

    #[test]
    fn parse_rejects_prose() {
        let err = parse_record("I could not find a table in this image.").unwrap_err();
        assert!(matches!(err, TablexError::InvalidRecord { .. }));
    }

    #[test]
    fn parse_rejects_missing_fields() {
        let err = parse_record("{\"name\": \"t\"}").unwrap_err();
        assert!(err.to_string().contains("not a valid table record"));
    }

    #[test]
    fn preview_truncates_long_answers() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert!(p.ends_with('…'));
        assert_eq!(p.chars().count(), 201);
    }

    #[test]
    fn document_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let record = StructuredTableRecord {
            name: "t".into(),
            summary: "s".into(),
            columns: vec!["a".into()],
            data: vec![],
        };
        let path = write_document_json(dir.path(), &record).unwrap();
        assert!(path.ends_with(DOCUMENT_JSON));
        let back: StructuredTableRecord =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn document_json_into_missing_dir_fails() {
        let record = StructuredTableRecord {
            name: "t".into(),
            summary: String::new(),
            columns: vec![],
            data: vec![],
        };
        let err = write_document_json(Path::new("/nonexistent/dir"), &record).unwrap_err();
        assert!(matches!(err, TablexError::OutputWriteFailed { .. }));
    }
}
