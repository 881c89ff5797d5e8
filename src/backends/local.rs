//! A backend which runs a vision-language model inside this process.
//!
//! The model runtime itself lives behind [`VisionModel`] and [`ModelLoader`].
//! This backend takes care of loading it off the async executor, resizing
//! images, and making sure only one generation runs at a time.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use image::DynamicImage;
use tokio::sync::Semaphore;

use super::{Backend, BatchConcurrency};
use crate::{
    async_utils::spawn_blocking_task,
    error::OcrError,
    image_utils::{MAX_IMAGE_SIZE, resize_to_max},
    prelude::*,
};

/// A loaded vision-language model. Calls to `generate` block.
pub trait VisionModel: Send + Sync + 'static {
    /// Generate a response to `prompt` about `image`.
    fn generate(&self, prompt: &str, image: &DynamicImage) -> Result<String>;
}

/// Loads [`VisionModel`]s by name. Loading blocks, and may be slow.
pub trait ModelLoader: fmt::Debug + Send + Sync + 'static {
    /// Load the named model.
    fn load(&self, model_name: &str) -> Result<Arc<dyn VisionModel>>;
}

/// Backend for an in-process model.
pub struct LocalBackend {
    /// The model to load.
    model_name: String,

    /// How to load it.
    loader: Arc<dyn ModelLoader>,

    /// The model, once loaded.
    model: RwLock<Option<Arc<dyn VisionModel>>>,

    /// We only have one copy of the model, so only one generation may run at
    /// a time.
    inference_gate: Semaphore,
}

impl fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBackend")
            .field("model_name", &self.model_name)
            .field("loaded", &self.loaded_model().is_some())
            .finish()
    }
}

impl LocalBackend {
    /// Create a new local backend. Nothing is loaded until `initialize`.
    pub fn new(model_name: &str, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            model_name: model_name.to_owned(),
            loader,
            model: RwLock::new(None),
            inference_gate: Semaphore::new(1),
        }
    }

    fn loaded_model(&self) -> Option<Arc<dyn VisionModel>> {
        self.model.read().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    #[instrument(level = "debug", skip_all, fields(model = %self.model_name))]
    async fn initialize(&self) -> Result<(), OcrError> {
        info!("Loading model {}", self.model_name);
        let loader = self.loader.clone();
        let model_name = self.model_name.clone();
        let model = spawn_blocking_task(move || loader.load(&model_name))
            .await
            .map_err(|err| {
                OcrError::Initialization(format!(
                    "could not load model {}: {err:#}",
                    self.model_name
                ))
            })?;
        *self.model.write().expect("lock poisoned") = Some(model);
        info!("Model {} loaded", self.model_name);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model_name))]
    async fn chat(&self, prompt: &str, image: &DynamicImage) -> Result<String, OcrError> {
        let model = self.loaded_model().ok_or_else(|| OcrError::NotReady {
            engine: self.model_name.clone(),
            state: "model not loaded".to_owned(),
        })?;

        let _permit = self
            .inference_gate
            .acquire()
            .await
            .map_err(OcrError::processing)?;
        let prompt = prompt.to_owned();
        let image = image.clone();
        spawn_blocking_task(move || {
            let resized = resize_to_max(&image, MAX_IMAGE_SIZE);
            model.generate(&prompt, &resized)
        })
        .await
        .map_err(OcrError::processing)
    }

    async fn health_check(&self) -> bool {
        self.loaded_model().is_some()
    }

    async fn cleanup(&self) {
        if self.model.write().expect("lock poisoned").take().is_some() {
            debug!(model = %self.model_name, "Released model");
        }
    }

    fn batch_concurrency(&self) -> BatchConcurrency {
        BatchConcurrency::Sequential
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::GenericImageView as _;

    use super::*;
    use crate::image_utils::tests::solid_image;

    /// A model which describes the image it was given, and tracks how many
    /// generations overlap.
    #[derive(Default)]
    pub(crate) struct EchoModel {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl VisionModel for EchoModel {
        fn generate(&self, prompt: &str, image: &DynamicImage) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let (w, h) = image.dimensions();
            Ok(format!("{prompt} {w}x{h}"))
        }
    }

    /// Loads [`EchoModel`], or fails if asked for a model named `missing`.
    #[derive(Debug, Default)]
    pub(crate) struct EchoLoader {
        pub(crate) model: Arc<EchoModel>,
    }

    impl fmt::Debug for EchoModel {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("EchoModel")
        }
    }

    impl ModelLoader for EchoLoader {
        fn load(&self, model_name: &str) -> Result<Arc<dyn VisionModel>> {
            if model_name == "missing" {
                return Err(anyhow!("no weights for {model_name}"));
            }
            Ok(self.model.clone())
        }
    }

    #[tokio::test]
    async fn chat_requires_initialize() {
        let backend = LocalBackend::new("echo", Arc::new(EchoLoader::default()));
        assert!(!backend.health_check().await);
        let err = backend.chat("hi", &solid_image(10, 10)).await.unwrap_err();
        assert!(matches!(err, OcrError::NotReady { .. }));
    }

    #[tokio::test]
    async fn load_failures_are_initialization_errors() {
        let backend = LocalBackend::new("missing", Arc::new(EchoLoader::default()));
        let err = backend.initialize().await.unwrap_err();
        assert!(matches!(err, OcrError::Initialization(_)));
        assert!(err.to_string().contains("no weights for missing"));
    }

    #[tokio::test]
    async fn chat_resizes_before_inference() {
        let backend = LocalBackend::new("echo", Arc::new(EchoLoader::default()));
        backend.initialize().await.unwrap();
        let text = backend.chat("size?", &solid_image(2048, 512)).await.unwrap();
        assert_eq!(text, "size? 1024x256");
        backend.cleanup().await;
        backend.cleanup().await;
        assert!(!backend.health_check().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn generations_never_overlap() {
        let loader = Arc::new(EchoLoader::default());
        let backend = Arc::new(LocalBackend::new("echo", loader.clone()));
        backend.initialize().await.unwrap();
        let image = solid_image(8, 8);
        let calls = (0..6).map(|_| backend.chat("x", &image));
        futures::future::join_all(calls).await;
        assert_eq!(loader.model.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
