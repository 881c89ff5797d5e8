use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod backends;
mod cmd;
mod config;
mod data_url;
mod engines;
mod error;
mod format;
mod generative;
mod image_utils;
mod layout;
mod prelude;
mod records;
mod registry;
mod render;
mod retry;
mod service;
mod ui;

/// OCR images using layout-aware vision models or generative APIs.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OCR_DEFAULT_ENGINE: Engine used when --engine is omitted.
  - OCR_LAYOUT_BACKEND: `remote` (default). `local` needs an in-process
    model runtime, which this build does not include.
  - OCR_LAYOUT_SERVER_URL: OpenAI-compatible server for the layout engine.
  - OCR_LAYOUT_MODEL: Model name for the layout engine.
  - OCR_REQUEST_TIMEOUT: Per-request timeout in seconds.
  - OCR_MAX_BATCH_SIZE: Largest batch sent to an engine at once.
  - OCR_GEMINI_MODEL: Model used by the gemini engine.
  - OCR_GEMINI_MAX_CONCURRENT: Concurrent gemini requests.
  - OCR_GEMINI_STREAM: Stream gemini responses.
  - OCR_GOOGLE_API_KEY: API key for the gemini engine.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR a single image.
    Ocr(cmd::ocr::OcrOpts),
    /// OCR many images. Input records should have `id` and `path` or `image`.
    Batch(cmd::batch::BatchOpts),
    /// List available engines.
    Engines(cmd::engines::EnginesOpts),
    /// Start an engine and check that it is ready.
    Health(cmd::health::HealthOpts),
    /// Print schemas for input and output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Ocr(opts) => opts.output_path.is_none(),
            Cmd::Batch(opts) => opts.output_path.is_none(),
            Cmd::Engines(opts) => opts.output_path.is_none(),
            Cmd::Health(opts) => opts.output_path.is_none(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Ocr(opts) => cmd::ocr::cmd_ocr(ui, opts).await,
        Cmd::Batch(opts) => cmd::batch::cmd_batch(ui, opts).await,
        Cmd::Engines(opts) => cmd::engines::cmd_engines(opts).await,
        Cmd::Health(opts) => cmd::health::cmd_health(opts).await,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await,
    }
}
