//! The `ocr` subcommand.

use clap::Args;

use super::{Session, report_failure};
use crate::{
    async_utils::io::{write_json_output, write_output},
    config::EngineConfig,
    error::OcrError,
    format::OutputFormat,
    prelude::*,
    records::OcrResponse,
    ui::{ProgressLabels, Ui},
};

/// Options for the `ocr` subcommand.
#[derive(Debug, Args)]
pub struct OcrOpts {
    /// The image to OCR.
    #[clap(value_name = "PATH")]
    pub input_path: PathBuf,

    /// The engine to use. Defaults to `--default-engine`.
    #[clap(long)]
    pub engine: Option<String>,

    /// The output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::Markdown)]
    pub format: OutputFormat,

    /// The input file contains Base64 text instead of image bytes.
    #[clap(long)]
    pub base64: bool,

    /// Write only the recognized content, not a JSON response.
    #[clap(long)]
    pub content_only: bool,

    /// Where to write our output. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config: EngineConfig,
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all, fields(path = %opts.input_path.display()))]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let session = Session::new(&opts.config);
    let output_path = opts.output_path.as_deref();
    if let Err(err) = session.check_request(opts.engine.as_deref(), opts.format) {
        return report_failure(output_path, err).await;
    }

    let data = tokio::fs::read(&opts.input_path)
        .await
        .with_context(|| format!("Failed to read image at path: {:?}", opts.input_path))?;

    let spinner = ui.new_spinner(&ProgressLabels {
        emoji: "🔎",
        running: "Recognizing image",
        finished: "Recognized image",
    });
    let outcome = recognize(&session, opts, &data).await;
    session.shutdown().await;
    spinner.finish_and_clear();

    match outcome {
        Ok(response) if opts.content_only => write_output(output_path, &response.content).await,
        Ok(response) => write_json_output(output_path, &response).await,
        Err(err) => report_failure(output_path, err).await,
    }
}

/// Start the engine and recognize `data`.
async fn recognize(session: &Session, opts: &OcrOpts, data: &[u8]) -> Result<OcrResponse, OcrError> {
    let service = session.start(opts.engine.as_deref()).await?;
    let processed = if opts.base64 {
        let image_b64 = String::from_utf8_lossy(data);
        service.process_image(&image_b64, None, opts.format).await?
    } else {
        service.process_image_bytes(data, None, opts.format).await?
    };
    info!(
        engine = %processed.engine,
        ms = processed.processing_time_ms,
        "Recognized image"
    );
    Ok(processed.into())
}
