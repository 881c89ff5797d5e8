//! Input and output records for our command-line interface.
//!
//! All of these have JSON Schemas, printed by the `schema` subcommand.

use schemars::JsonSchema;

use crate::{
    error::OcrError,
    format::{OutputFormat, RecognitionResult},
    prelude::*,
    service::Processed,
};

/// One image to OCR as part of a batch. Exactly one of `path` and `image`
/// must be set.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BatchInput {
    /// An ID for this record, copied to the output.
    pub id: Value,

    /// The path to an image file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Base64-encoded image data.
    #[serde(default)]
    pub image: Option<String>,
}

/// Where a batch input's image comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchImage<'a> {
    Path(&'a Path),
    Base64(&'a str),
}

impl BatchInput {
    /// Find this record's image. Empty CSV cells count as missing.
    pub fn image_source(&self) -> Result<BatchImage<'_>> {
        let path = self
            .path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty());
        let image = self.image.as_deref().filter(|i| !i.trim().is_empty());
        match (path, image) {
            (Some(path), None) => Ok(BatchImage::Path(path)),
            (None, Some(image)) => Ok(BatchImage::Base64(image)),
            (Some(_), Some(_)) => Err(anyhow!(
                "record {} has both \"path\" and \"image\"",
                self.id
            )),
            (None, None) => Err(anyhow!(
                "record {} needs either \"path\" or \"image\"",
                self.id
            )),
        }
    }
}

/// The result of OCRing one image.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct OcrResponse {
    /// The recognized content.
    pub content: String,

    /// The format of `content`.
    pub format: OutputFormat,

    /// The engine which did the work.
    pub engine: String,

    /// Time spent in the engine, in milliseconds.
    pub processing_time_ms: u64,
}

impl From<Processed<RecognitionResult>> for OcrResponse {
    fn from(processed: Processed<RecognitionResult>) -> Self {
        Self {
            content: processed.output.content,
            format: processed.output.format,
            engine: processed.engine,
            processing_time_ms: processed.processing_time_ms,
        }
    }
}

/// The outcome for one image of a batch.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchItemResult {
    /// The input record's ID.
    pub id: Value,

    /// The recognized content, if we succeeded.
    pub content: Option<String>,

    /// Did we succeed?
    pub success: bool,

    /// What went wrong, if we failed.
    pub error: Option<String>,
}

impl BatchItemResult {
    /// Build a result from an engine outcome.
    pub fn new(id: Value, outcome: Result<RecognitionResult, OcrError>) -> Self {
        match outcome {
            Ok(result) => Self {
                id,
                content: Some(result.content),
                success: true,
                error: None,
            },
            Err(err) => Self::failed(id, &err.to_string()),
        }
    }

    /// Build a failed result.
    pub fn failed(id: Value, error: &str) -> Self {
        Self {
            id,
            content: None,
            success: false,
            error: Some(error.to_owned()),
        }
    }
}

/// The results of OCRing a batch of images.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchResponse {
    /// One result per input, in input order.
    pub results: Vec<BatchItemResult>,

    /// The format of every `content`.
    pub format: OutputFormat,

    /// The engine which did the work.
    pub engine: String,

    /// Time spent in the engine, in milliseconds.
    pub processing_time_ms: u64,

    /// Number of inputs.
    pub total: usize,

    /// Number of inputs we recognized.
    pub succeeded: usize,

    /// Number of inputs that failed.
    pub failed: usize,
}

impl BatchResponse {
    /// Build a response, computing the summary counts.
    pub fn new(
        results: Vec<BatchItemResult>,
        format: OutputFormat,
        engine: String,
        processing_time_ms: u64,
    ) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            failed: results.len() - succeeded,
            succeeded,
            results,
            format,
            engine,
            processing_time_ms,
        }
    }
}

/// Whether our engines are ready to work.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `ready` or `not_ready`.
    pub status: String,

    /// Running engines.
    pub engines: Vec<String>,
}

impl HealthReport {
    /// Build a report.
    pub fn new(ready: bool, engines: Vec<String>) -> Self {
        Self {
            status: if ready { "ready" } else { "not_ready" }.to_owned(),
            engines,
        }
    }
}

/// A registered engine, as listed by the `engines` subcommand.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    /// The engine's name.
    pub name: String,

    /// What the engine does.
    pub description: String,

    /// Formats the engine can produce.
    pub supported_formats: Vec<OutputFormat>,

    /// Is this the default engine?
    pub default: bool,
}
