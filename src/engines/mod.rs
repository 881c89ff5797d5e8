//! OCR engines.
//!
//! An engine turns image bytes into a [`RecognitionResult`]. We have two:
//!
//! - [`document::DocumentEngine`] asks a vision-language model for the page
//!   layout, then reads each region separately.
//! - [`generative::GenerativeEngine`] sends the whole page to a hosted
//!   generative API and asks for Markdown.

use futures::future::join_all;

use crate::{
    error::OcrError,
    format::{OutputFormat, RecognitionResult},
    prelude::*,
};

pub mod document;
pub mod generative;
pub mod lifecycle;

/// One outcome per batch input, in input order. A failed item never affects
/// its siblings.
pub type BatchOutcome = Vec<Result<RecognitionResult, OcrError>>;

/// Interface implemented by every OCR engine.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// The engine's registered name.
    fn name(&self) -> &'static str;

    /// The output formats this engine can produce.
    fn supported_formats(&self) -> &'static [OutputFormat];

    /// Prepare the engine for use. An engine which fails to initialize must
    /// not be used.
    async fn initialize(&self) -> Result<(), OcrError>;

    /// Recognize a single image.
    async fn process(
        &self,
        image: &[u8],
        format: OutputFormat,
    ) -> Result<RecognitionResult, OcrError>;

    /// Recognize several images. By default, we process all of them at once.
    async fn process_batch(&self, images: &[Vec<u8>], format: OutputFormat) -> BatchOutcome {
        join_all(images.iter().map(|image| self.process(image, format))).await
    }

    /// Is the engine able to do work? This has no side effects.
    async fn health_check(&self) -> bool;

    /// Release the engine's resources. Safe to call more than once, and
    /// before `initialize` has finished.
    async fn cleanup(&self);
}

/// Log how a batch went.
pub(crate) fn log_batch_summary(engine: &str, outcome: &BatchOutcome) {
    let failed = outcome.iter().filter(|r| r.is_err()).count();
    info!(
        engine,
        total = outcome.len(),
        succeeded = outcome.len() - failed,
        failed,
        "Batch complete"
    );
}

/// Fail unless `engine` supports `format`.
pub(crate) fn check_format(engine: &dyn Engine, format: OutputFormat) -> Result<(), OcrError> {
    let supported = engine.supported_formats();
    if supported.contains(&format) {
        Ok(())
    } else {
        Err(OcrError::UnsupportedFormat {
            format,
            engine: engine.name().to_owned(),
            supported: supported.to_vec(),
        })
    }
}
