//! The `engines` subcommand.

use clap::Args;

use crate::{
    async_utils::io::write_json_output, config::EngineConfig, prelude::*,
    records::EngineInfo, registry::builtin_registry,
};

/// Options for the `engines` subcommand.
#[derive(Debug, Args)]
pub struct EnginesOpts {
    /// Where to write our output. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config: EngineConfig,
}

/// List the registered engines. This doesn't start any of them.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_engines(opts: &EnginesOpts) -> Result<()> {
    let registry = builtin_registry(&opts.config, None);
    let engines = registry
        .list_engines()
        .into_iter()
        .map(|descriptor| EngineInfo {
            name: descriptor.name.to_owned(),
            description: descriptor.description.to_owned(),
            supported_formats: descriptor.supported_formats.clone(),
            default: descriptor.name == opts.config.default_engine,
        })
        .collect::<Vec<_>>();
    write_json_output(opts.output_path.as_deref(), &engines).await
}
