//! The `health` subcommand.

use clap::Args;

use super::Session;
use crate::{
    async_utils::io::write_json_output, config::EngineConfig, prelude::*,
    records::HealthReport,
};

/// Options for the `health` subcommand.
#[derive(Debug, Args)]
pub struct HealthOpts {
    /// The engine to check. Defaults to `--default-engine`.
    #[clap(long)]
    pub engine: Option<String>,

    /// Where to write our output. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config: EngineConfig,
}

/// Start an engine, check that it works, and report the result. Exits with an
/// error if the engine isn't ready.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_health(opts: &HealthOpts) -> Result<()> {
    let session = Session::new(&opts.config);
    let report = match session.start(opts.engine.as_deref()).await {
        Ok(service) => service.health().await,
        Err(err) => {
            warn!("Engine failed to start: {err}");
            HealthReport::new(false, vec![])
        }
    };
    session.shutdown().await;

    write_json_output(opts.output_path.as_deref(), &report).await?;
    if report.status != "ready" {
        return Err(anyhow!(
            "engine {} is not ready",
            session.engine_name(opts.engine.as_deref())
        ));
    }
    Ok(())
}
