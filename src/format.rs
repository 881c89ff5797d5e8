//! Output formats and recognition results.

use std::fmt;

use clap::ValueEnum;
use schemars::JsonSchema;
use serde_json::Map;

use crate::prelude::*;

/// The formats an engine can render its output in.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    JsonSchema,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown text.
    #[default]
    Markdown,
    /// An HTML fragment.
    Html,
    /// A JSON document listing layout elements.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Html => write!(f, "html"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// The result of recognizing a single image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecognitionResult {
    /// The rendered content.
    pub content: String,

    /// The format of `content`.
    pub format: OutputFormat,

    /// Engine-specific details, like element counts or the model used.
    pub metadata: Map<String, Value>,
}

impl RecognitionResult {
    /// Create a new result with no metadata.
    pub fn new(content: String, format: OutputFormat) -> Self {
        Self {
            content,
            format,
            metadata: Map::new(),
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }
}
