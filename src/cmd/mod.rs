//! Command-line entry points.

use std::sync::Arc;

use crate::{
    async_utils::io::write_json_output,
    config::EngineConfig,
    error::{ErrorReport, OcrError},
    format::OutputFormat,
    prelude::*,
    registry::{EngineRegistry, builtin_registry},
    service::OcrService,
};

pub mod batch;
pub mod engines;
pub mod health;
pub mod ocr;
pub mod schema;

/// Our engines for the duration of one command.
pub struct Session {
    registry: Arc<EngineRegistry>,
    default_engine: String,
    max_batch_size: usize,
}

impl Session {
    /// Register our built-in engines. Nothing is started yet.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: Arc::new(builtin_registry(config, None)),
            default_engine: config.default_engine.clone(),
            max_batch_size: config.max_batch_size,
        }
    }

    /// The name of the engine we'd use for a request.
    pub fn engine_name<'a>(&'a self, engine: Option<&'a str>) -> &'a str {
        engine.unwrap_or(&self.default_engine)
    }

    /// Check that an engine exists and supports `format`, without starting
    /// it. This lets us reject bad requests before touching the network.
    pub fn check_request(&self, engine: Option<&str>, format: OutputFormat) -> Result<(), OcrError> {
        let descriptor = self.registry.get_class(self.engine_name(engine))?;
        if descriptor.supported_formats.contains(&format) {
            Ok(())
        } else {
            Err(OcrError::UnsupportedFormat {
                format,
                engine: descriptor.name.to_owned(),
                supported: descriptor.supported_formats.clone(),
            })
        }
    }

    /// Reject batches larger than our ceiling, before doing any work.
    pub fn check_batch_size(&self, size: usize) -> Result<(), OcrError> {
        if size > self.max_batch_size {
            return Err(OcrError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    /// Start an engine, and return a service which uses it by default.
    pub async fn start(&self, engine: Option<&str>) -> Result<OcrService, OcrError> {
        let name = self.engine_name(engine);
        self.registry.initialize_engine(name).await?;
        Ok(OcrService::new(
            self.registry.clone(),
            name,
            self.max_batch_size,
        ))
    }

    /// Clean up all running engines.
    pub async fn shutdown(&self) {
        self.registry.cleanup_all().await;
    }
}

/// Write a structured error report, then fail with the same error.
pub async fn report_failure(output_path: Option<&Path>, err: OcrError) -> Result<()> {
    write_json_output(output_path, &ErrorReport::from(&err)).await?;
    Err(anyhow::Error::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::parse_config;

    #[test]
    fn batches_over_the_ceiling_are_rejected() {
        let session = Session::new(&parse_config(&["--max-batch-size", "2"]));
        assert!(session.check_batch_size(0).is_ok());
        assert!(session.check_batch_size(2).is_ok());
        let err = session.check_batch_size(5).unwrap_err();
        assert!(matches!(err, OcrError::BatchTooLarge { size: 5, max: 2 }));
        assert_eq!(err.error_type(), "BatchTooLarge");
    }

    #[test]
    fn requests_are_checked_against_descriptors() {
        let session = Session::new(&parse_config(&[]));
        assert!(session.check_request(None, OutputFormat::Html).is_ok());
        assert!(matches!(
            session.check_request(Some("gemini"), OutputFormat::Json),
            Err(OcrError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            session.check_request(Some("nope"), OutputFormat::Markdown),
            Err(OcrError::EngineNotFound(_))
        ));
    }
}
