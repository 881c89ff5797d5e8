//! Engine configuration, from command-line flags or `OCR_*` environment
//! variables. Variables may also be set in a `.env` file.

use std::{fmt, time::Duration};

use clap::Args;

use crate::{
    backends::{BackendSettings, BackendType},
    engines::generative::GenerativeSettings,
};

/// Settings shared by every subcommand that runs engines.
#[derive(Clone, Args)]
pub struct EngineConfig {
    /// Engine used when a request doesn't name one.
    #[clap(long, env = "OCR_DEFAULT_ENGINE", default_value = "layout")]
    pub default_engine: String,

    /// How the layout engine reaches its model. `local` is an extension point
    /// for builds that supply an in-process model runtime; this binary ships
    /// none, so it fails at startup.
    #[clap(long, env = "OCR_LAYOUT_BACKEND", value_enum, default_value_t = BackendType::Remote)]
    pub layout_backend: BackendType,

    /// Base URL of the OpenAI-compatible server used by the remote backend.
    #[clap(
        long,
        env = "OCR_LAYOUT_SERVER_URL",
        default_value = "http://localhost:8000/v1"
    )]
    pub layout_server_url: String,

    /// Model used by the layout engine.
    #[clap(long, env = "OCR_LAYOUT_MODEL", default_value = "ByteDance/Dolphin-v2")]
    pub layout_model: String,

    /// Timeout for each remote request, in seconds.
    #[clap(long, env = "OCR_REQUEST_TIMEOUT", default_value = "120")]
    pub request_timeout: u64,

    /// Largest batch we accept.
    #[clap(long, env = "OCR_MAX_BATCH_SIZE", default_value = "8")]
    pub max_batch_size: usize,

    /// Model used by the `gemini` engine.
    #[clap(long, env = "OCR_GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    pub gemini_model: String,

    /// The most `gemini` requests to run at once.
    #[clap(long, env = "OCR_GEMINI_MAX_CONCURRENT", default_value = "5")]
    pub gemini_max_concurrent: usize,

    /// Stream `gemini` responses instead of waiting for the whole answer.
    #[clap(long, env = "OCR_GEMINI_STREAM")]
    pub gemini_stream: bool,

    /// API key for the `gemini` engine.
    #[clap(long, env = "OCR_GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,
}

// Keep the API key out of our logs.
impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("default_engine", &self.default_engine)
            .field("layout_backend", &self.layout_backend)
            .field("layout_server_url", &self.layout_server_url)
            .field("layout_model", &self.layout_model)
            .field("request_timeout", &self.request_timeout)
            .field("max_batch_size", &self.max_batch_size)
            .field("gemini_model", &self.gemini_model)
            .field("gemini_max_concurrent", &self.gemini_max_concurrent)
            .field("gemini_stream", &self.gemini_stream)
            .field(
                "google_api_key",
                &self.google_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl EngineConfig {
    /// Timeout for remote requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Settings for the layout engine's backend.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            backend_type: self.layout_backend,
            model: self.layout_model.clone(),
            server_url: self.layout_server_url.clone(),
            timeout_secs: self.request_timeout,
        }
    }

    /// Settings for the `gemini` engine.
    pub fn generative_settings(&self) -> GenerativeSettings {
        GenerativeSettings {
            model: self.gemini_model.clone(),
            max_concurrent: self.gemini_max_concurrent,
            stream: self.gemini_stream,
        }
    }
}
