//! The `batch` subcommand.

use clap::Args;
use indicatif::ProgressBar;
use futures::TryStreamExt as _;

use super::{Session, report_failure};
use crate::{
    async_utils::io::{read_jsonl_or_csv, write_json_output},
    config::EngineConfig,
    format::OutputFormat,
    prelude::*,
    records::{BatchImage, BatchInput, BatchItemResult, BatchResponse},
    service::{OcrService, decode_base64_image},
    ui::{ProgressLabels, Ui},
};

/// Options for the `batch` subcommand.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// JSONL or CSV records with `id` and either `path` or `image` fields.
    /// Defaults to standard input.
    #[clap(value_name = "INPUT")]
    pub input_path: Option<PathBuf>,

    /// The engine to use. Defaults to `--default-engine`.
    #[clap(long)]
    pub engine: Option<String>,

    /// The output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::Markdown)]
    pub format: OutputFormat,

    /// Where to write our output. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config: EngineConfig,
}

/// The `batch` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    let session = Session::new(&opts.config);
    let output_path = opts.output_path.as_deref();
    let engine = opts.engine.as_deref();
    if let Err(err) = session.check_request(engine, opts.format) {
        return report_failure(output_path, err).await;
    }

    let inputs = read_inputs(opts.input_path.as_deref()).await?;
    info!(count = inputs.len(), "Read batch inputs");
    if let Err(err) = session.check_batch_size(inputs.len()) {
        return report_failure(output_path, err).await;
    }

    let service = match session.start(engine).await {
        Ok(service) => service,
        Err(err) => return report_failure(output_path, err).await,
    };

    let progress = ui.new_image_counter(
        &ProgressLabels {
            emoji: "📄",
            running: "Recognizing images",
            finished: "Recognized images",
        },
        inputs.len() as u64,
    );
    let response = run_batch(&service, &inputs, opts.format, &progress).await;
    session.shutdown().await;
    progress.finish_and_clear();

    info!(
        total = response.total,
        succeeded = response.succeeded,
        failed = response.failed,
        "Batch finished"
    );
    write_json_output(output_path, &response).await
}

/// Read and parse our input records.
async fn read_inputs(path: Option<&Path>) -> Result<Vec<BatchInput>> {
    read_jsonl_or_csv(path)
        .await?
        .and_then(|value| async move {
            serde_json::from_value::<BatchInput>(value.clone())
                .with_context(|| format!("Invalid batch record: {value}"))
        })
        .try_collect()
        .await
}

/// Load the image for one record.
async fn load_image(input: &BatchInput) -> Result<Vec<u8>> {
    match input.image_source()? {
        BatchImage::Path(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image at path: {:?}", path)),
        BatchImage::Base64(image_b64) => Ok(decode_base64_image(image_b64)?),
    }
}

/// Recognize every input in one engine batch. Inputs we can't load are
/// reported as failures without being sent.
async fn run_batch(
    service: &OcrService,
    inputs: &[BatchInput],
    format: OutputFormat,
    progress: &ProgressBar,
) -> BatchResponse {
    let mut results = vec![None; inputs.len()];
    let mut pending_indices = vec![];
    let mut pending_images = vec![];
    for (idx, input) in inputs.iter().enumerate() {
        match load_image(input).await {
            Ok(image) => {
                pending_indices.push(idx);
                pending_images.push(image);
            }
            Err(err) => {
                warn!(id = %input.id, "Skipping input: {err:#}");
                results[idx] = Some(BatchItemResult::failed(input.id.clone(), &format!("{err:#}")));
                progress.inc(1);
            }
        }
    }

    let mut processing_time_ms = 0;
    if !pending_images.is_empty() {
        match service.process_batch_bytes(&pending_images, None, format).await {
            Ok(processed) => {
                processing_time_ms = processed.processing_time_ms;
                for (&idx, outcome) in pending_indices.iter().zip(processed.output) {
                    results[idx] = Some(BatchItemResult::new(inputs[idx].id.clone(), outcome));
                }
            }
            Err(err) => {
                error!("Batch failed: {err}");
                for &idx in &pending_indices {
                    results[idx] = Some(BatchItemResult::failed(
                        inputs[idx].id.clone(),
                        &err.to_string(),
                    ));
                }
            }
        }
        progress.inc(pending_indices.len() as u64);
    }

    BatchResponse::new(
        results.into_iter().flatten().collect(),
        format,
        service.default_engine().to_owned(),
        processing_time_ms,
    )
}
