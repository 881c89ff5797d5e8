//! Shared client for hosted generative APIs, such as Gemini.
//!
//! We use the [`genai`] crate. A [`GenerativeService`] is constructed from
//! configuration, becomes ready once [`GenerateContent::start`] has built a
//! client, and is closed at shutdown. Every call goes through our
//! [`RetryPolicy`], on both the single-response and streaming paths.

use std::{
    fmt,
    sync::{Arc, RwLock},
    time::Duration,
};

use futures::StreamExt as _;
use genai::{
    Client, ModelIden,
    chat::{
        ChatMessage, ChatOptions, ChatRequest, ChatRole, ChatStreamEvent, ContentPart,
        ImageSource, MessageContent,
    },
    resolver::{AuthData, AuthResolver},
};

use crate::{
    async_utils::BoxedStream,
    error::OcrError,
    prelude::*,
    retry::{RetryPolicy, retry_result_ok, try_fatal, try_transient},
};

/// An image to include in a request, already Base64-encoded.
#[derive(Clone, Debug)]
pub struct InlineImage {
    /// The image's MIME type.
    pub mime_type: String,

    /// The Base64 image data.
    pub base64: Arc<str>,
}

/// A single-turn request: some images followed by a text instruction.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    /// The model to call.
    pub model: String,

    /// Images to show the model.
    pub images: Vec<InlineImage>,

    /// What to do with them.
    pub prompt: String,

    /// Sampling temperature. We use 0.0 for repeatable output.
    pub temperature: f64,
}

impl GenerateRequest {
    /// Convert to a [`genai`] request.
    fn to_chat_request(&self) -> ChatRequest {
        let mut parts = self
            .images
            .iter()
            .map(|image| ContentPart::Image {
                content_type: image.mime_type.clone(),
                source: ImageSource::Base64(image.base64.clone()),
            })
            .collect::<Vec<_>>();
        parts.push(ContentPart::Text(self.prompt.clone()));
        ChatRequest {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: MessageContent::Parts(parts),
                options: None,
            }],
            ..ChatRequest::default()
        }
    }

    /// Options for this request.
    fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: Some(self.temperature),
            ..ChatOptions::default()
        }
    }
}

/// A stream of generated text chunks.
pub type TextStream = BoxedStream<Result<String>>;

/// Interface to a generative API. [`GenerativeService`] is the real one.
#[async_trait]
pub trait GenerateContent: fmt::Debug + Send + Sync + 'static {
    /// Move from constructed to ready. Fails if we have no credentials.
    fn start(&self) -> Result<(), OcrError>;

    /// Have we started, and not yet been closed?
    fn is_ready(&self) -> bool;

    /// Generate a complete response.
    async fn generate(&self, request: &GenerateRequest) -> Result<String>;

    /// Generate a response as a stream of text chunks.
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<TextStream>;

    /// Release our client. Safe to call more than once.
    fn close(&self);
}

/// Our shared generative API client.
pub struct GenerativeService {
    /// The API key, if configured.
    api_key: Option<String>,

    /// The client. Present only while the service is ready.
    client: RwLock<Option<Client>>,

    /// How to retry failed calls.
    retry_policy: RetryPolicy,

    /// Timeout for each attempt.
    timeout: Duration,
}

impl fmt::Debug for GenerativeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the API key.
        f.debug_struct("GenerativeService")
            .field("has_api_key", &self.api_key.is_some())
            .field("ready", &self.is_ready())
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GenerativeService {
    /// Create a new service. Nothing happens until [`GenerateContent::start`].
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client: RwLock::new(None),
            retry_policy: RetryPolicy::default(),
            timeout,
        }
    }

    /// Use a different retry policy.
    #[cfg(test)]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Get our client, or fail if we're not ready.
    fn client(&self) -> Result<Client> {
        self.client
            .read()
            .expect("lock poisoned")
            .clone()
            .ok_or_else(|| anyhow!("generative API client is not configured"))
    }

    /// Run `future` with our per-attempt timeout.
    async fn with_timeout<T>(
        &self,
        future: impl Future<Output = genai::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(anyhow!("generative API call timed out after {:?}", self.timeout)),
        }
    }
}

#[async_trait]
impl GenerateContent for GenerativeService {
    fn start(&self) -> Result<(), OcrError> {
        let key = self.api_key.clone().ok_or_else(|| {
            OcrError::Initialization(
                "a Google API key is required. Set OCR_GOOGLE_API_KEY".to_owned(),
            )
        })?;
        let auth_resolver = AuthResolver::from_resolver_fn(
            move |_model_iden: ModelIden| -> Result<Option<AuthData>, genai::resolver::Error> {
                Ok(Some(AuthData::from_single(key.clone())))
            },
        );
        let client = Client::builder().with_auth_resolver(auth_resolver).build();
        *self.client.write().expect("lock poisoned") = Some(client);
        info!("Generative API client ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.client.read().expect("lock poisoned").is_some()
    }

    #[instrument(level = "debug", skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let chat_request = &request.to_chat_request();
        let options = &request.chat_options();
        self.retry_policy
            .run("generate_content", || async move {
                let client = try_fatal!(self.client());
                debug!(model = %request.model, "Calling generate_content");
                let response = try_transient!(
                    self.with_timeout(client.exec_chat(
                        &request.model,
                        chat_request.clone(),
                        Some(options),
                    ))
                    .await
                );
                let text = response
                    .content
                    .as_ref()
                    .and_then(|content| content.text_as_str())
                    .unwrap_or_default()
                    .to_owned();
                retry_result_ok(text)
            })
            .await
    }

    #[instrument(level = "debug", skip_all, fields(model = %request.model))]
    async fn generate_stream(&self, request: &GenerateRequest) -> Result<TextStream> {
        let chat_request = &request.to_chat_request();
        let options = &request.chat_options();
        let response = self
            .retry_policy
            .run("generate_content_stream", || async move {
                let client = try_fatal!(self.client());
                debug!(model = %request.model, "Calling generate_content_stream");
                let response = try_transient!(
                    self.with_timeout(client.exec_chat_stream(
                        &request.model,
                        chat_request.clone(),
                        Some(options),
                    ))
                    .await
                );
                retry_result_ok(response)
            })
            .await?;
        let chunks = response.stream.filter_map(|event| async move {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => Some(Ok(chunk.content)),
                Ok(_) => None,
                Err(err) => Some(Err(anyhow::Error::from(err).context("stream failed"))),
            }
        });
        Ok(Box::pin(chunks))
    }

    fn close(&self) {
        if self.client.write().expect("lock poisoned").take().is_some() {
            debug!("Generative API client closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "gemini-2.0-flash".to_owned(),
            images: vec![InlineImage {
                mime_type: "image/jpeg".to_owned(),
                base64: Arc::from("AAAA"),
            }],
            prompt: "Extract the text.".to_owned(),
            temperature: 0.0,
        }
    }

    #[test]
    fn request_puts_images_before_prompt() {
        let chat = request().to_chat_request();
        assert_eq!(chat.messages.len(), 1);
        let MessageContent::Parts(parts) = &chat.messages[0].content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(
            &parts[0],
            ContentPart::Image { content_type, .. } if content_type == "image/jpeg"
        ));
        assert!(matches!(&parts[1], ContentPart::Text(text) if text == "Extract the text."));
        assert_eq!(request().chat_options().temperature, Some(0.0));
    }

    #[test]
    fn start_requires_an_api_key() {
        for key in [None, Some("  ".to_owned())] {
            let service = GenerativeService::new(key, Duration::from_secs(1));
            let err = service.start().unwrap_err();
            assert!(matches!(err, OcrError::Initialization(_)));
            assert!(!service.is_ready());
        }
    }

    #[test]
    fn lifecycle_goes_from_constructed_to_ready_to_closed() {
        let service = GenerativeService::new(Some("secret".to_owned()), Duration::from_secs(1));
        assert!(!service.is_ready());
        service.start().unwrap();
        assert!(service.is_ready());
        service.close();
        service.close();
        assert!(!service.is_ready());
        assert!(!format!("{service:?}").contains("secret"));
    }

    #[tokio::test]
    async fn calls_before_start_fail_without_retrying() {
        let service = GenerativeService::new(Some("secret".to_owned()), Duration::from_secs(1))
            .with_retry_policy(RetryPolicy::fast(3));
        let err = service.generate(&request()).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert!(service.generate_stream(&request()).await.is_err());
    }
}
