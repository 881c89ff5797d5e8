//! The OCR service: validates requests and dispatches them to engines.

use std::{sync::Arc, time::Instant};

use base64::{Engine as _, prelude::BASE64_STANDARD};

use crate::{
    engines::{BatchOutcome, Engine, check_format},
    error::OcrError,
    format::{OutputFormat, RecognitionResult},
    prelude::*,
    records::HealthReport,
    registry::EngineRegistry,
};

/// The output of an engine call, along with who did it and how long it took.
#[derive(Debug)]
pub struct Processed<T> {
    /// The engine's output.
    pub output: T,

    /// The name of the engine which did the work.
    pub engine: String,

    /// Time spent inside the engine, in whole milliseconds.
    pub processing_time_ms: u64,
}

/// Dispatches OCR requests to the right engine.
#[derive(Debug)]
pub struct OcrService {
    registry: Arc<EngineRegistry>,
    default_engine: String,
    max_batch_size: usize,
}

impl OcrService {
    /// Create a new service.
    pub fn new(registry: Arc<EngineRegistry>, default_engine: &str, max_batch_size: usize) -> Self {
        Self {
            registry,
            default_engine: default_engine.to_owned(),
            max_batch_size,
        }
    }

    /// The engine used when a request doesn't name one.
    pub fn default_engine(&self) -> &str {
        &self.default_engine
    }

    /// Find a running engine, and make sure it supports `format`.
    fn resolve_engine(
        &self,
        engine: Option<&str>,
        format: OutputFormat,
    ) -> Result<Arc<dyn Engine>, OcrError> {
        let name = engine.unwrap_or(&self.default_engine);
        let engine = self.registry.get_instance(name)?;
        check_format(engine.as_ref(), format)?;
        Ok(engine)
    }

    /// Recognize one Base64-encoded image.
    #[instrument(level = "debug", skip(self, image_b64))]
    pub async fn process_image(
        &self,
        image_b64: &str,
        engine: Option<&str>,
        format: OutputFormat,
    ) -> Result<Processed<RecognitionResult>, OcrError> {
        let engine = self.resolve_engine(engine, format)?;
        let image = decode_base64_image(image_b64)?;
        let start = Instant::now();
        let output = engine.process(&image, format).await?;
        Ok(Processed {
            output,
            engine: engine.name().to_owned(),
            processing_time_ms: elapsed_ms(start),
        })
    }

    /// Recognize one image given as raw bytes, such as an uploaded file.
    pub async fn process_image_bytes(
        &self,
        image: &[u8],
        engine: Option<&str>,
        format: OutputFormat,
    ) -> Result<Processed<RecognitionResult>, OcrError> {
        let image_b64 = BASE64_STANDARD.encode(image);
        self.process_image(&image_b64, engine, format).await
    }

    /// Recognize a batch of Base64-encoded images. Every image must decode
    /// before any is processed. After that, each image succeeds or fails on
    /// its own.
    ///
    /// The `batch` subcommand decodes records one at a time with
    /// [`decode_base64_image`] instead, so one bad record only fails itself.
    #[cfg(test)]
    #[instrument(level = "debug", skip(self, images_b64), fields(count = images_b64.len()))]
    pub async fn process_batch(
        &self,
        images_b64: &[String],
        engine: Option<&str>,
        format: OutputFormat,
    ) -> Result<Processed<BatchOutcome>, OcrError> {
        self.check_batch_size(images_b64.len())?;
        let engine = self.resolve_engine(engine, format)?;
        let images = images_b64
            .iter()
            .map(|image_b64| decode_base64_image(image_b64))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(run_batch(engine.as_ref(), &images, format).await)
    }

    /// Recognize a batch of images given as raw bytes.
    pub async fn process_batch_bytes(
        &self,
        images: &[Vec<u8>],
        engine: Option<&str>,
        format: OutputFormat,
    ) -> Result<Processed<BatchOutcome>, OcrError> {
        self.check_batch_size(images.len())?;
        let engine = self.resolve_engine(engine, format)?;
        Ok(run_batch(engine.as_ref(), images, format).await)
    }

    /// The largest batch we accept.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn check_batch_size(&self, size: usize) -> Result<(), OcrError> {
        if size > self.max_batch_size {
            return Err(OcrError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    /// Check every running engine. We're ready if at least one engine is
    /// running, and all running engines are healthy.
    pub async fn health(&self) -> HealthReport {
        let engines = self.registry.list_initialized();
        let mut ready = !engines.is_empty();
        for name in &engines {
            let healthy = match self.registry.get_instance(name) {
                Ok(engine) => engine.health_check().await,
                Err(_) => false,
            };
            if !healthy {
                warn!(engine = %name, "Engine failed health check");
                ready = false;
            }
        }
        HealthReport::new(ready, engines)
    }
}

/// Time a batch on `engine`.
async fn run_batch(
    engine: &dyn Engine,
    images: &[Vec<u8>],
    format: OutputFormat,
) -> Processed<BatchOutcome> {
    let start = Instant::now();
    let output = engine.process_batch(images, format).await;
    Processed {
        output,
        engine: engine.name().to_owned(),
        processing_time_ms: elapsed_ms(start),
    }
}

/// Decode Base64 image data.
pub fn decode_base64_image(image_b64: &str) -> Result<Vec<u8>, OcrError> {
    BASE64_STANDARD
        .decode(image_b64.trim())
        .map_err(|err| OcrError::ImageDecoding(format!("Invalid base64 image: {err}")))
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
