//! Error types for OCR engines.
//!
//! Plumbing code uses [`anyhow::Result`], but anything a caller might want to
//! react to is an [`OcrError`]. Errors raised while resolving an engine,
//! checking its formats, or decoding input are returned before any backend is
//! called. Errors for a single item of a batch are stored in that item's slot
//! and never abort its siblings.

use schemars::JsonSchema;
use thiserror::Error;

use crate::{format::OutputFormat, prelude::*};

/// Errors reported by engines, backends and the OCR service.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Nobody registered an engine with this name, or it isn't running.
    #[error("Engine '{0}' not found")]
    EngineNotFound(String),

    /// The engine cannot produce the requested format.
    #[error(
        "Format '{format}' not supported by engine '{engine}' (supported: {})",
        format_list(.supported)
    )]
    UnsupportedFormat {
        format: OutputFormat,
        engine: String,
        supported: Vec<OutputFormat>,
    },

    /// Invalid base64, or bytes that aren't a readable image.
    #[error("Failed to process image: {0}")]
    ImageDecoding(String),

    /// The remote inference server was unreachable or returned garbage.
    #[error("Failed to connect to inference server at {url}: {reason}")]
    BackendConnectivity { url: String, reason: String },

    /// An engine could not start. This is fatal at startup.
    #[error("Failed to initialize engine: {0}")]
    Initialization(String),

    /// The backend answered, but something downstream went wrong.
    #[error("{0}")]
    Processing(String),

    /// A batch request exceeded the configured ceiling.
    #[error("Batch of {size} images exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// The engine was called before it was ready, or after it was closed.
    #[error("Engine '{engine}' is not ready (state: {state})")]
    NotReady { engine: String, state: String },
}

impl OcrError {
    /// The name of this error's variant, for structured error output.
    pub fn error_type(&self) -> &'static str {
        match self {
            OcrError::EngineNotFound(_) => "EngineNotFound",
            OcrError::UnsupportedFormat { .. } => "UnsupportedFormat",
            OcrError::ImageDecoding(_) => "ImageDecodingError",
            OcrError::BackendConnectivity { .. } => "BackendConnectivityError",
            OcrError::Initialization(_) => "InitializationError",
            OcrError::Processing(_) => "ProcessingError",
            OcrError::BatchTooLarge { .. } => "BatchTooLarge",
            OcrError::NotReady { .. } => "EngineNotReady",
        }
    }

    /// Wrap an arbitrary error as a [`OcrError::Processing`] error, keeping the
    /// full chain of causes.
    pub fn processing(err: impl Into<anyhow::Error>) -> Self {
        OcrError::Processing(format!("{:#}", err.into()))
    }
}

fn format_list(formats: &[OutputFormat]) -> String {
    formats
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A client-facing description of an error.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// A human-readable explanation.
    pub detail: String,

    /// The kind of error.
    pub error_type: String,
}

impl From<&OcrError> for ErrorReport {
    fn from(err: &OcrError) -> Self {
        Self {
            detail: err.to_string(),
            error_type: err.error_type().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_names_engine_and_supported_set() {
        let err = OcrError::UnsupportedFormat {
            format: OutputFormat::Html,
            engine: "gemini".to_owned(),
            supported: vec![OutputFormat::Markdown],
        };
        let msg = err.to_string();
        assert!(msg.contains("'html'"), "got: {msg}");
        assert!(msg.contains("'gemini'"), "got: {msg}");
        assert!(msg.contains("supported: markdown"), "got: {msg}");
    }

    #[test]
    fn report_carries_error_type() {
        let err = OcrError::EngineNotFound("nope".to_owned());
        let report = ErrorReport::from(&err);
        assert_eq!(report.error_type, "EngineNotFound");
        assert_eq!(report.detail, "Engine 'nope' not found");
    }

    #[test]
    fn processing_keeps_cause_chain() {
        let err = anyhow!("socket closed").context("calling model");
        let err = OcrError::processing(err);
        assert_eq!(err.to_string(), "calling model: socket closed");
    }
}
