use std::path::PathBuf;

use clap::{Parser, Subcommand};
use trademerge::Result;
use trademerge::config::RunConfig;
use trademerge::pipeline;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => execute_run(args).await,
    }
}

async fn execute_run(args: RunArgs) -> Result<()> {
    let mut config = RunConfig::load(&args.config)?;
    apply_overrides(&mut config, args);
    config.validate()?;

    let artifacts = pipeline::run(&config).await?;
    print!("{}", artifacts.report);
    Ok(())
}

fn apply_overrides(config: &mut RunConfig, args: RunArgs) {
    if let Some(start) = args.from_year {
        config.years.start = start;
    }
    if let Some(end) = args.to_year {
        config.years.end = end;
    }
    if let Some(reporters) = args.reporters {
        config.reporters = reporters;
    }
    if let Some(partners) = args.partners {
        config.partners = partners;
    }
    if let Some(indicators) = args.indicators {
        config.indicators = indicators;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(mapping) = args.mapping {
        config.mapping_path = mapping;
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Fetch, align, merge, and summarise trade and macro indicators."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute the fetch, map, merge, and report pipeline once.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Run configuration file (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Override the first year of the requested range.
    #[arg(long)]
    from_year: Option<i32>,

    /// Override the last year of the requested range.
    #[arg(long)]
    to_year: Option<i32>,

    /// Override the reporter scope: "all" or a comma-separated ISO3 list.
    #[arg(long, value_delimiter = ',')]
    reporters: Option<Vec<String>>,

    /// Override the partner scope, same convention as --reporters.
    #[arg(long, value_delimiter = ',')]
    partners: Option<Vec<String>>,

    /// Override the macro indicator codes.
    #[arg(long, value_delimiter = ',')]
    indicators: Option<Vec<String>>,

    /// Override the output directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override the code-mapping workbook path.
    #[arg(long)]
    mapping: Option<PathBuf>,
}
