use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use weighted_client::config::{
    default_worker_count, ClientConfig, ToolConfig, DEFAULT_CACHE_DIR, DEFAULT_MAX_WEIGHT,
};
use weighted_client::logging::init_logging;
use weighted_client::payload::{
    CommandPayloadGenerator, FeltArgumentFormatter, PayloadGenerator, SyntheticPayloadGenerator,
};
use weighted_client::pipeline::Pipeline;
use weighted_client::scheduler::{GenerationPlan, Mode, Strategy};
use weighted_client::shutdown::{install_shutdown_handler, stop_shutdown_handler};
use weighted_client::ClientError;

#[derive(Parser, Debug)]
#[command(name = "weighted-client")]
#[command(version)]
#[command(about = "Generate block batches and run them through an external prover under a weight budget")]
struct Args {
    /// First block height
    #[arg(long)]
    start: u64,

    /// Number of heights in the window
    #[arg(long, default_value = "1")]
    blocks: u64,

    /// Blocks covered by each job (ignored by the random strategy)
    #[arg(long, default_value = "1")]
    step: u64,

    #[arg(long, value_enum, default_value_t = Mode::Light)]
    mode: Mode,

    #[arg(long, value_enum, default_value_t = Strategy::Sequential)]
    strategy: Strategy,

    /// Ceiling on the total weight of queued and running jobs
    #[arg(long = "maxweight", default_value_t = DEFAULT_MAX_WEIGHT)]
    max_weight: u64,

    /// Ask the program to execute scripts
    #[arg(long)]
    execute_scripts: bool,

    /// Debug-level console logging
    #[arg(long, short)]
    verbose: bool,

    /// Worker count (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Directory for staging and arguments files
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Kill a tool run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Executable invoked for each job
    #[arg(long, default_value = "scarb")]
    tool: PathBuf,

    /// The tool's run subcommand
    #[arg(long, default_value = "cairo-run")]
    tool_subcommand: String,

    /// External payload generator, e.g. "python3 generate_data.py"
    /// (synthetic payloads when unset)
    #[arg(long)]
    generator_cmd: Option<String>,

    /// Seed for synthetic payloads and the random strategy
    #[arg(long)]
    seed: Option<u64>,

    /// Also write INFO logs to daily files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let tool = ToolConfig {
            program: self.tool.clone(),
            subcommand: self.tool_subcommand.clone(),
            ..ToolConfig::default()
        };
        ClientConfig::default()
            .with_max_weight(self.max_weight)
            .with_worker_count(self.workers.unwrap_or_else(default_worker_count))
            .with_cache_dir(&self.cache_dir)
            .with_job_timeout(self.timeout_secs.map(Duration::from_secs))
            .with_tool(tool)
    }

    fn plan(&self) -> GenerationPlan {
        GenerationPlan::new(self.start, self.blocks)
            .with_step(self.step)
            .with_mode(self.mode)
            .with_strategy(self.strategy)
            .with_execute_scripts(self.execute_scripts)
            .with_seed(self.seed)
    }

    fn payload_generator(
        &self,
        token: &CancellationToken,
    ) -> Result<Arc<dyn PayloadGenerator>, ClientError> {
        match &self.generator_cmd {
            Some(line) => CommandPayloadGenerator::from_command_line(line)
                .map(|gen| {
                    let gen = gen
                        .with_cancellation(token.clone())
                        .with_termination_grace(self.client_config().termination_grace);
                    Arc::new(gen) as Arc<dyn PayloadGenerator>
                })
                .ok_or_else(|| {
                    ClientError::InvalidConfig("--generator-cmd must not be empty".to_string())
                }),
            None => Ok(Arc::new(SyntheticPayloadGenerator::new(
                self.seed.unwrap_or_default(),
            ))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _logging = init_logging(args.verbose, args.log_dir.as_deref())?;

    let token = CancellationToken::new();
    let pipeline = Pipeline::new(
        args.client_config(),
        args.payload_generator(&token)?,
        Arc::new(FeltArgumentFormatter),
    )?;

    let signals = install_shutdown_handler(token.clone())?;

    let summary = pipeline.run(&args.plan(), token.clone()).await?;

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)?;
    }

    // Stop the signal listener if the run ended on its own.
    stop_shutdown_handler(&token, signals).await;

    Ok(())
}
