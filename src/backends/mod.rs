//! Backends used by the layout engine to reach a vision-language model.
//!
//! A backend only needs to answer `chat(prompt, image) -> text`. We have one
//! backend that runs a model in-process, and one that talks to an
//! OpenAI-compatible inference server such as vLLM. The layout engine is
//! generic over [`Backend`], and production code uses [`AnyBackend`], which
//! dispatches statically to whichever variant was configured.

use std::{fmt, sync::Arc};

use clap::ValueEnum;
use image::DynamicImage;

use crate::{error::OcrError, prelude::*};

pub mod local;
pub mod remote;

pub use self::{
    local::{LocalBackend, ModelLoader},
    remote::RemoteBackend,
};

/// How many images of a batch a backend can work on at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchConcurrency {
    /// Process every image of a batch concurrently.
    Parallel,

    /// Process one image at a time. Used when there's a single model instance
    /// that can't interleave generations.
    Sequential,
}

/// Interface to a vision-language model.
#[async_trait]
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Prepare the backend. Failures here are fatal.
    async fn initialize(&self) -> Result<(), OcrError>;

    /// Ask the model about an image.
    async fn chat(&self, prompt: &str, image: &DynamicImage) -> Result<String, OcrError>;

    /// Is the backend usable right now? This has no side effects.
    async fn health_check(&self) -> bool;

    /// Release any resources. Safe to call more than once.
    async fn cleanup(&self);

    /// How batches should be scheduled on this backend.
    fn batch_concurrency(&self) -> BatchConcurrency;
}

/// Our different backend types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum BackendType {
    /// An OpenAI-compatible inference server.
    #[default]
    Remote,

    /// A model loaded into this process. Requires a [`ModelLoader`].
    Local,
}

/// Settings needed to construct a backend.
#[derive(Clone, Debug)]
pub struct BackendSettings {
    /// Which backend to use.
    pub backend_type: BackendType,

    /// The model to load or request.
    pub model: String,

    /// Base URL of the inference server, ending in `/v1`.
    pub server_url: String,

    /// Timeout for each request to the inference server.
    pub timeout_secs: u64,
}

/// One of our backends, chosen at startup.
#[derive(Debug)]
pub enum AnyBackend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl AnyBackend {
    /// Construct the configured backend. `loader` is required for local
    /// backends.
    pub fn new(
        settings: &BackendSettings,
        loader: Option<Arc<dyn ModelLoader>>,
    ) -> Result<Self, OcrError> {
        match settings.backend_type {
            BackendType::Remote => Ok(AnyBackend::Remote(RemoteBackend::new(
                &settings.server_url,
                &settings.model,
                settings.timeout_secs,
            )?)),
            BackendType::Local => {
                let loader = loader.ok_or_else(|| {
                    OcrError::Initialization(format!(
                        "no local model runtime is available to load {}; use the remote backend",
                        settings.model
                    ))
                })?;
                Ok(AnyBackend::Local(LocalBackend::new(&settings.model, loader)))
            }
        }
    }
}

#[async_trait]
impl Backend for AnyBackend {
    async fn initialize(&self) -> Result<(), OcrError> {
        match self {
            AnyBackend::Local(backend) => backend.initialize().await,
            AnyBackend::Remote(backend) => backend.initialize().await,
        }
    }

    async fn chat(&self, prompt: &str, image: &DynamicImage) -> Result<String, OcrError> {
        match self {
            AnyBackend::Local(backend) => backend.chat(prompt, image).await,
            AnyBackend::Remote(backend) => backend.chat(prompt, image).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AnyBackend::Local(backend) => backend.health_check().await,
            AnyBackend::Remote(backend) => backend.health_check().await,
        }
    }

    async fn cleanup(&self) {
        match self {
            AnyBackend::Local(backend) => backend.cleanup().await,
            AnyBackend::Remote(backend) => backend.cleanup().await,
        }
    }

    fn batch_concurrency(&self) -> BatchConcurrency {
        match self {
            AnyBackend::Local(backend) => backend.batch_concurrency(),
            AnyBackend::Remote(backend) => backend.batch_concurrency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend_type: BackendType) -> BackendSettings {
        BackendSettings {
            backend_type,
            model: "test-model".to_owned(),
            server_url: "http://localhost:9/v1/".to_owned(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn local_backend_needs_a_loader() {
        let err = AnyBackend::new(&settings(BackendType::Local), None).unwrap_err();
        assert!(matches!(err, OcrError::Initialization(_)));
    }

    #[test]
    fn backends_declare_batch_concurrency() {
        let remote = AnyBackend::new(&settings(BackendType::Remote), None).unwrap();
        assert_eq!(remote.batch_concurrency(), BatchConcurrency::Parallel);

        let loader = Arc::new(local::tests::EchoLoader::default());
        let local = AnyBackend::new(&settings(BackendType::Local), Some(loader)).unwrap();
        assert_eq!(local.batch_concurrency(), BatchConcurrency::Sequential);
    }
}
