//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;

use crate::{
    async_utils::io::write_json_output,
    error::ErrorReport,
    prelude::*,
    records::{BatchInput, BatchResponse, EngineInfo, HealthReport, OcrResponse},
    render::LayoutElement,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// Input records for `batch`.
    BatchInput,
    /// Output of `batch`.
    BatchResponse,
    /// Entries listed by `engines`.
    EngineInfo,
    /// Errors written by `ocr`.
    ErrorReport,
    /// Output of `health`.
    HealthReport,
    /// Elements in `json` output.
    LayoutElement,
    /// Output of `ocr`.
    OcrResponse,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(opts: &SchemaOpts) -> Result<()> {
    let schema = match opts.schema_type {
        SchemaType::BatchInput => schema_for!(BatchInput),
        SchemaType::BatchResponse => schema_for!(BatchResponse),
        SchemaType::EngineInfo => schema_for!(EngineInfo),
        SchemaType::ErrorReport => schema_for!(ErrorReport),
        SchemaType::HealthReport => schema_for!(HealthReport),
        SchemaType::LayoutElement => schema_for!(LayoutElement),
        SchemaType::OcrResponse => schema_for!(OcrResponse),
    };
    write_json_output(opts.output_path.as_deref(), &schema).await
}
