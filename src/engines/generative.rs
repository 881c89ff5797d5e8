//! An engine which sends whole pages to a hosted generative API and asks for
//! Markdown.

use std::sync::Arc;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use futures::TryStreamExt as _;
use tokio::sync::Semaphore;

use super::{BatchOutcome, Engine, check_format, lifecycle::Lifecycle, log_batch_summary};
use crate::{
    data_url::sniff_image_mime_type,
    error::OcrError,
    format::{OutputFormat, RecognitionResult},
    generative::{GenerateContent, GenerateRequest, InlineImage},
    prelude::*,
};

/// The name this engine is registered under.
pub const GENERATIVE_ENGINE_NAME: &str = "gemini";

/// Formats we can produce.
pub const GENERATIVE_FORMATS: &[OutputFormat] = &[OutputFormat::Markdown];

/// Our instructions to the model.
pub const MARKDOWN_PROMPT: &str = include_str!("prompts/markdown.txt");

/// Settings for [`GenerativeEngine`].
#[derive(Clone, Debug)]
pub struct GenerativeSettings {
    /// The model to call.
    pub model: String,

    /// The most calls we allow in flight at once.
    pub max_concurrent: usize,

    /// Read responses as a stream of chunks, instead of all at once.
    pub stream: bool,
}

/// Engine backed by a hosted generative API.
#[derive(Debug)]
pub struct GenerativeEngine {
    settings: GenerativeSettings,
    generator: Arc<dyn GenerateContent>,
    lifecycle: Lifecycle,

    /// Limits calls in flight across all callers.
    gate: Semaphore,
}

impl GenerativeEngine {
    /// Create a new engine. `generator` is usually shared by the whole
    /// process.
    pub fn new(settings: GenerativeSettings, generator: Arc<dyn GenerateContent>) -> Self {
        let permits = settings.max_concurrent.max(1);
        Self {
            settings,
            generator,
            lifecycle: Lifecycle::new(GENERATIVE_ENGINE_NAME),
            gate: Semaphore::new(permits),
        }
    }

    fn request_for(&self, image: &[u8]) -> GenerateRequest {
        GenerateRequest {
            model: self.settings.model.clone(),
            images: vec![InlineImage {
                mime_type: sniff_image_mime_type(image).to_owned(),
                base64: Arc::from(BASE64_STANDARD.encode(image)),
            }],
            prompt: MARKDOWN_PROMPT.to_owned(),
            temperature: 0.0,
        }
    }

    async fn call_model(&self, request: &GenerateRequest) -> Result<String> {
        if self.settings.stream {
            let chunks = self.generator.generate_stream(request).await?;
            chunks.try_collect::<Vec<_>>().await.map(|chunks| chunks.concat())
        } else {
            self.generator.generate(request).await
        }
    }
}

#[async_trait]
impl Engine for GenerativeEngine {
    fn name(&self) -> &'static str {
        GENERATIVE_ENGINE_NAME
    }

    fn supported_formats(&self) -> &'static [OutputFormat] {
        GENERATIVE_FORMATS
    }

    #[instrument(level = "debug", skip_all, fields(engine = GENERATIVE_ENGINE_NAME))]
    async fn initialize(&self) -> Result<(), OcrError> {
        self.lifecycle.begin_initialize()?;
        let result = self.generator.start();
        self.lifecycle.finish_initialize(result.is_ok());
        result?;
        info!(
            model = %self.settings.model,
            max_concurrent = self.settings.max_concurrent,
            "Generative engine ready"
        );
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(engine = GENERATIVE_ENGINE_NAME, %format))]
    async fn process(
        &self,
        image: &[u8],
        format: OutputFormat,
    ) -> Result<RecognitionResult, OcrError> {
        self.lifecycle.ensure_ready()?;
        check_format(self, format)?;
        let request = self.request_for(image);

        let _permit = self.gate.acquire().await.map_err(OcrError::processing)?;
        let content = self
            .call_model(&request)
            .await
            .map_err(|err| OcrError::Processing(format!("Generative API error: {err:#}")))?;
        debug!(chars = content.len(), "Extracted text");
        Ok(RecognitionResult::new(content.trim().to_owned(), format)
            .with_metadata("model", self.settings.model.clone()))
    }

    async fn process_batch(&self, images: &[Vec<u8>], format: OutputFormat) -> BatchOutcome {
        let outcome =
            futures::future::join_all(images.iter().map(|image| self.process(image, format)))
                .await;
        log_batch_summary(GENERATIVE_ENGINE_NAME, &outcome);
        outcome
    }

    async fn health_check(&self) -> bool {
        self.lifecycle.is_ready() && self.generator.is_ready()
    }

    async fn cleanup(&self) {
        if self.lifecycle.begin_shutdown() {
            self.generator.close();
            self.lifecycle.finish_shutdown();
        }
    }
}
