//! A backend which talks to an OpenAI-compatible inference server, such as
//! vLLM serving a vision-language model.

use std::time::Duration;

use async_openai::{Client, config::OpenAIConfig};
use image::DynamicImage;
use reqwest::StatusCode;

use super::{Backend, BatchConcurrency};
use crate::{
    async_utils::spawn_blocking_task,
    data_url::data_url,
    error::OcrError,
    image_utils::{MAX_IMAGE_SIZE, encode_png, resize_to_max},
    prelude::*,
};

/// The most tokens we ask the server to generate per request.
const MAX_TOKENS: u32 = 4096;

/// Backend for a remote inference server.
#[derive(Debug)]
pub struct RemoteBackend {
    /// The server's base URL, without a trailing slash.
    base_url: String,

    /// The model to request.
    model: String,

    /// Pooled HTTP client, shared with `client`.
    http: reqwest::Client,

    /// Chat completions client.
    client: Client<OpenAIConfig>,
}

impl RemoteBackend {
    /// Create a new remote backend. This does not touch the network.
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, OcrError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| OcrError::Initialization(format!("HTTP client: {err}")))?;
        let config = OpenAIConfig::new().with_api_base(&base_url);
        let client = Client::with_config(config).with_http_client(http.clone());
        Ok(Self {
            base_url,
            model: model.to_owned(),
            http,
            client,
        })
    }

    /// Wrap an error as a connectivity error for our server.
    fn connectivity_error(&self, reason: impl ToString) -> OcrError {
        OcrError::BackendConnectivity {
            url: self.base_url.clone(),
            reason: reason.to_string(),
        }
    }

    /// Does the server answer `GET /models` with 200 OK?
    async fn probe(&self) -> Result<(), String> {
        let url = format!("{}/models", self.base_url);
        let response = self.http.get(&url).send().await.map_err(|err| err.to_string())?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(format!("GET {url} returned {status}")),
        }
    }
}

/// Build a chat completion request containing one image and one prompt.
fn chat_request(model: &str, prompt: &str, image_url: &str) -> Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image_url", "image_url": { "url": image_url } },
                { "type": "text", "text": prompt },
            ],
        }],
        "max_tokens": MAX_TOKENS,
        "temperature": 0,
    })
}

/// Pull the generated text out of a chat completion response.
fn response_content(response: &Value) -> Option<&str> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
}

#[async_trait]
impl Backend for RemoteBackend {
    #[instrument(level = "debug", skip_all, fields(url = %self.base_url))]
    async fn initialize(&self) -> Result<(), OcrError> {
        self.probe().await.map_err(|reason| {
            OcrError::Initialization(format!(
                "cannot reach inference server at {}: {reason}",
                self.base_url
            ))
        })?;
        info!("Connected to inference server at {}", self.base_url);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(url = %self.base_url, model = %self.model))]
    async fn chat(&self, prompt: &str, image: &DynamicImage) -> Result<String, OcrError> {
        let image = image.clone();
        let png = spawn_blocking_task(move || encode_png(&resize_to_max(&image, MAX_IMAGE_SIZE)))
            .await
            .map_err(OcrError::processing)?;
        let request = chat_request(&self.model, prompt, &data_url("image/png", &png));

        let response: Value = self
            .client
            .chat()
            .create_byot(request)
            .await
            .map_err(|err| self.connectivity_error(err))?;
        let content = response_content(&response).ok_or_else(|| {
            self.connectivity_error(format!("response has no message content: {response}"))
        })?;
        trace!(chars = content.len(), "Received completion");
        Ok(content.to_owned())
    }

    async fn health_check(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(reason) => {
                debug!("Health check failed: {reason}");
                false
            }
        }
    }

    async fn cleanup(&self) {
        // The connection pool closes when the client is dropped.
        debug!(url = %self.base_url, "Remote backend released");
    }

    fn batch_concurrency(&self) -> BatchConcurrency {
        BatchConcurrency::Parallel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_utils::tests::solid_image;

    /// Nothing listens on the discard port.
    const DEAD_SERVER: &str = "http://127.0.0.1:9/v1/";

    #[test]
    fn request_has_image_then_prompt() {
        let request = chat_request("m", "Read text in the image.", "data:image/png;base64,AA==");
        assert_eq!(request["model"], "m");
        assert_eq!(request["max_tokens"], 4096);
        assert_eq!(request["temperature"], 0);
        let content = &request["messages"][0]["content"];
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,AA==");
        assert_eq!(content[1]["text"], "Read text in the image.");
    }

    #[test]
    fn extracts_message_content() {
        let response = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(response_content(&response), Some("hello"));
        assert_eq!(response_content(&json!({"choices": []})), None);
        let null_content = json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(response_content(&null_content), None);
    }

    #[tokio::test]
    async fn unreachable_server_fails_initialization_with_url() {
        let backend = RemoteBackend::new(DEAD_SERVER, "m", 2).unwrap();
        let err = backend.initialize().await.unwrap_err();
        assert!(matches!(err, OcrError::Initialization(_)));
        assert!(err.to_string().contains("http://127.0.0.1:9/v1"));
        assert!(!backend.health_check().await);
    }

    #[tokio::test]
    async fn unreachable_server_fails_chat_with_connectivity_error() {
        let backend = RemoteBackend::new(DEAD_SERVER, "m", 2).unwrap();
        let err = backend.chat("hi", &solid_image(4, 4)).await.unwrap_err();
        assert!(matches!(err, OcrError::BackendConnectivity { .. }), "{err:?}");
    }
}
