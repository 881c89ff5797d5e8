//! The layout-aware document engine.
//!
//! Each page goes through three passes. First we ask the model for the page
//! layout. Then we crop each region and ask the model to read it with a prompt
//! suited to its label. Finally we render the regions in reading order.

use image::{DynamicImage, GenericImageView as _};

use super::{BatchOutcome, Engine, check_format, lifecycle::Lifecycle, log_batch_summary};
use crate::{
    backends::{Backend, BatchConcurrency},
    error::OcrError,
    format::{OutputFormat, RecognitionResult},
    image_utils::decode_image,
    layout::{DISTORTED_PAGE_LABEL, FIGURE_LABEL, parse_layout_or_whole_page, rescale_bbox},
    prelude::*,
    render::{LayoutElement, render_elements},
};

/// The name this engine is registered under.
pub const DOCUMENT_ENGINE_NAME: &str = "layout";

/// Formats we can render.
pub const DOCUMENT_FORMATS: &[OutputFormat] =
    &[OutputFormat::Markdown, OutputFormat::Html, OutputFormat::Json];

/// Prompt for the layout pass.
pub const LAYOUT_PROMPT: &str = "Parse the reading order of this document.";

/// Text we emit for figures instead of reading them.
pub const FIGURE_PLACEHOLDER: &str = "[Figure]";

/// Regions narrower or shorter than this many pixels are skipped.
const MIN_CROP_SIZE: u32 = 4;

/// Choose the prompt for reading a region with the given label.
pub fn element_prompt(label: &str) -> &'static str {
    match label {
        "tab" => "Parse the table in the image.",
        "equ" => "Read formula in the image.",
        "code" => "Read code in the image.",
        _ => "Read text in the image.",
    }
}

/// Layout-aware document engine, generic over the backend used to reach the
/// model.
#[derive(Debug)]
pub struct DocumentEngine<B: Backend> {
    backend: B,
    lifecycle: Lifecycle,
}

impl<B: Backend> DocumentEngine<B> {
    /// Create a new engine. Call `initialize` before use.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            lifecycle: Lifecycle::new(DOCUMENT_ENGINE_NAME),
        }
    }

    /// The backend we talk to.
    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the layout and element passes over one page.
    #[instrument(level = "debug", skip_all)]
    async fn extract_elements(
        &self,
        image: &DynamicImage,
    ) -> Result<Vec<LayoutElement>, OcrError> {
        let (width, height) = image.dimensions();
        let layout = self.backend.chat(LAYOUT_PROMPT, image).await?;
        let regions = parse_layout_or_whole_page(&layout);
        debug!(regions = regions.len(), width, height, "Detected layout");

        let mut elements = Vec::with_capacity(regions.len());
        for (reading_order, region) in regions.into_iter().enumerate() {
            let bbox = if region.label == DISTORTED_PAGE_LABEL {
                [0, 0, width, height]
            } else {
                rescale_bbox(region.bbox, width, height)
            };
            let [x1, y1, x2, y2] = bbox;
            if x2 - x1 < MIN_CROP_SIZE || y2 - y1 < MIN_CROP_SIZE {
                trace!(?bbox, label = %region.label, "Skipping tiny region");
                continue;
            }

            let text = if region.label == FIGURE_LABEL {
                FIGURE_PLACEHOLDER.to_owned()
            } else {
                let crop = image.crop_imm(x1, y1, x2 - x1, y2 - y1);
                let prompt = element_prompt(&region.label);
                self.backend.chat(prompt, &crop).await?.trim().to_owned()
            };
            elements.push(LayoutElement {
                label: region.label,
                text,
                bbox,
                reading_order,
                tags: region.tags,
            });
        }
        Ok(elements)
    }
}

#[async_trait]
impl<B: Backend> Engine for DocumentEngine<B> {
    fn name(&self) -> &'static str {
        DOCUMENT_ENGINE_NAME
    }

    fn supported_formats(&self) -> &'static [OutputFormat] {
        DOCUMENT_FORMATS
    }

    #[instrument(level = "debug", skip_all, fields(engine = DOCUMENT_ENGINE_NAME))]
    async fn initialize(&self) -> Result<(), OcrError> {
        self.lifecycle.begin_initialize()?;
        let result = self.backend.initialize().await;
        self.lifecycle.finish_initialize(result.is_ok());
        result
    }

    #[instrument(level = "debug", skip_all, fields(engine = DOCUMENT_ENGINE_NAME, %format))]
    async fn process(
        &self,
        image: &[u8],
        format: OutputFormat,
    ) -> Result<RecognitionResult, OcrError> {
        self.lifecycle.ensure_ready()?;
        check_format(self, format)?;
        let image = decode_image(image)?;
        let elements = self.extract_elements(&image).await?;
        let content = render_elements(&elements, format).map_err(OcrError::processing)?;
        Ok(RecognitionResult::new(content, format)
            .with_metadata("element_count", elements.len()))
    }

    async fn process_batch(&self, images: &[Vec<u8>], format: OutputFormat) -> BatchOutcome {
        let outcome = match self.backend.batch_concurrency() {
            BatchConcurrency::Parallel => {
                futures::future::join_all(
                    images.iter().map(|image| self.process(image, format)),
                )
                .await
            }
            BatchConcurrency::Sequential => {
                let mut outcome = Vec::with_capacity(images.len());
                for image in images {
                    outcome.push(self.process(image, format).await);
                }
                outcome
            }
        };
        log_batch_summary(DOCUMENT_ENGINE_NAME, &outcome);
        outcome
    }

    async fn health_check(&self) -> bool {
        self.lifecycle.is_ready() && self.backend.health_check().await
    }

    async fn cleanup(&self) {
        if self.lifecycle.begin_shutdown() {
            self.backend.cleanup().await;
            self.lifecycle.finish_shutdown();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::image_utils::tests::solid_png;

    /// A backend which returns a fixed layout, and answers every other prompt
    /// with the prompt itself.
    #[derive(Debug)]
    pub(crate) struct ScriptedBackend {
        layout: String,
        concurrency: BatchConcurrency,
        pub(crate) calls: AtomicUsize,
        prompts: Mutex<Vec<(String, (u32, u32))>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedBackend {
        pub(crate) fn new(layout: &str, concurrency: BatchConcurrency) -> Self {
            Self {
                layout: layout.to_owned(),
                concurrency,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(vec![]),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn prompts(&self) -> Vec<(String, (u32, u32))> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn initialize(&self) -> Result<(), OcrError> {
            Ok(())
        }

        async fn chat(&self, prompt: &str, image: &DynamicImage) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_owned(), image.dimensions()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if prompt == LAYOUT_PROMPT {
                Ok(self.layout.clone())
            } else {
                Ok(format!("  {prompt}\n"))
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn cleanup(&self) {}

        fn batch_concurrency(&self) -> BatchConcurrency {
            self.concurrency
        }
    }

    const PAGE_LAYOUT: &str = "[0,0,1000,200], title[0,200,1000,800], tab[0,800,500,1000], fig[500,800,1000,1000], equ, []";

    pub(crate) async fn ready_engine(
        layout: &str,
        concurrency: BatchConcurrency,
    ) -> DocumentEngine<ScriptedBackend> {
        let engine = DocumentEngine::new(ScriptedBackend::new(layout, concurrency));
        engine.initialize().await.unwrap();
        engine
    }

    #[test]
    fn prompts_depend_on_label() {
        assert_eq!(element_prompt("tab"), "Parse the table in the image.");
        assert_eq!(element_prompt("equ"), "Read formula in the image.");
        assert_eq!(element_prompt("code"), "Read code in the image.");
        for label in ["text", "para", "title", "distorted_page", "mystery"] {
            assert_eq!(element_prompt(label), "Read text in the image.");
        }
    }

    #[tokio::test]
    async fn reads_regions_in_reading_order() {
        let engine = ready_engine(PAGE_LAYOUT, BatchConcurrency::Parallel).await;
        let result = engine
            .process(&solid_png(100, 50), OutputFormat::Markdown)
            .await
            .unwrap();
        assert_eq!(
            result.content,
            "Read text in the image.\n\nParse the table in the image.\n\n[Figure]\n\n$$\nRead formula in the image.\n$$"
        );
        assert_eq!(result.metadata["element_count"], json!(4));

        // One layout call plus one per non-figure region, each on its crop.
        let prompts = engine.backend.prompts();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[0], (LAYOUT_PROMPT.to_owned(), (100, 50)));
        assert_eq!(prompts[1].1, (100, 10));
        assert_eq!(prompts[2].1, (100, 30));
        assert_eq!(prompts[3].1, (50, 10));
    }

    #[tokio::test]
    async fn unusable_layout_reads_the_whole_page() {
        let engine = ready_engine("Sorry, I can't see a document.", BatchConcurrency::Parallel).await;
        let result = engine
            .process(&solid_png(64, 48), OutputFormat::Json)
            .await
            .unwrap();
        let doc: Value = serde_json::from_str(&result.content).unwrap();
        let element = &doc["elements"][0];
        assert_eq!(element["label"], DISTORTED_PAGE_LABEL);
        assert_eq!(element["bbox"], json!([0, 0, 64, 48]));
        assert_eq!(element["text"], "Read text in the image.");
        assert_eq!(engine.backend.prompts()[1].1, (64, 48));
    }

    #[tokio::test]
    async fn tiny_regions_are_skipped() {
        let engine = ready_engine(
            "[0,0,1,1], para[0,0,1000,1000], para[10,10,12,900], code]",
            BatchConcurrency::Parallel,
        )
        .await;
        let result = engine
            .process(&solid_png(100, 100), OutputFormat::Html)
            .await
            .unwrap();
        assert_eq!(result.metadata["element_count"], json!(1));
        assert!(result.content.contains("<p data-bbox='[0,0,100,100]'>Read text in the image.</p>"));
        assert_eq!(engine.backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn must_be_initialized_and_not_closed() {
        let engine = DocumentEngine::new(ScriptedBackend::new(PAGE_LAYOUT, BatchConcurrency::Parallel));
        let err = engine
            .process(&solid_png(10, 10), OutputFormat::Markdown)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::NotReady { .. }));
        assert!(!engine.health_check().await);

        engine.initialize().await.unwrap();
        assert!(engine.health_check().await);
        engine.cleanup().await;
        engine.cleanup().await;
        assert!(!engine.health_check().await);
        assert!(engine.process(&solid_png(10, 10), OutputFormat::Markdown).await.is_err());
        assert_eq!(engine.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_failures_stay_in_their_slot() {
        let engine = ready_engine(PAGE_LAYOUT, BatchConcurrency::Parallel).await;
        let images = vec![solid_png(100, 50), b"not an image".to_vec(), solid_png(100, 50)];
        let outcome = engine.process_batch(&images, OutputFormat::Markdown).await;
        assert_eq!(outcome.len(), 3);
        assert!(outcome[0].is_ok());
        assert!(matches!(outcome[1], Err(OcrError::ImageDecoding(_))));
        assert_eq!(
            outcome[2].as_ref().unwrap().content,
            outcome[0].as_ref().unwrap().content
        );
    }

    #[tokio::test]
    async fn batch_scheduling_follows_the_backend() {
        let images = vec![solid_png(20, 20); 4];

        let sequential = ready_engine("[0,0,1000,1000], para]", BatchConcurrency::Sequential).await;
        let outcome = sequential.process_batch(&images, OutputFormat::Markdown).await;
        assert!(outcome.iter().all(Result::is_ok));
        assert_eq!(sequential.backend.max_in_flight.load(Ordering::SeqCst), 1);

        let parallel = ready_engine("[0,0,1000,1000], para]", BatchConcurrency::Parallel).await;
        let outcome = parallel.process_batch(&images, OutputFormat::Markdown).await;
        assert!(outcome.iter().all(Result::is_ok));
        assert!(parallel.backend.max_in_flight.load(Ordering::SeqCst) > 1);
    }
}
