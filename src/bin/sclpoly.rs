//! sclpoly CLI - landscape unit classification runs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use sclpoly::core::resample::GridResampler;
use sclpoly::io::{LocalCatalog, LocalExporter};
use sclpoly::{ExportOutcome, Pipeline, PipelineConfig, RunRequest, SclError};

#[derive(Parser)]
#[command(name = "sclpoly")]
#[command(author, version, about = "Species Conservation Landscape polygons", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the landscape classification for one species and date
    Run {
        /// Snapshot date (YYYY-MM-DD)
        #[arg(long)]
        taskdate: NaiveDate,
        /// Species key, used in input and output paths
        #[arg(long)]
        species: String,
        /// Scenario name (defaults to "canonical")
        #[arg(long)]
        scenario: Option<String>,
        /// Replace existing outputs instead of versioning them
        #[arg(long)]
        overwrite: bool,
        /// Root of the dataset catalog
        #[arg(long)]
        data_dir: PathBuf,
        /// Root directory for exported artifacts
        #[arg(long)]
        output_dir: PathBuf,
        /// Pipeline configuration (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as JSON
    DefaultConfig,
    /// Validate a configuration file
    CheckConfig {
        /// Configuration file (JSON)
        config: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            taskdate,
            species,
            scenario,
            overwrite,
            data_dir,
            output_dir,
            config,
        } => {
            let config = load_config(config.as_ref())?;
            let catalog = LocalCatalog::new(&data_dir)?;
            let exporter = LocalExporter::new(&output_dir, overwrite);
            let resampler = GridResampler;
            let pipeline = Pipeline::new(config, &catalog, &exporter, &resampler)?;

            let request = RunRequest {
                species,
                scenario,
                taskdate,
            };
            let start = Instant::now();
            let report = pipeline.run(&request)?;

            for output in &report.outputs {
                match &output.outcome {
                    ExportOutcome::Written { location } => println!("  {:<28} {}", output.name, location),
                    ExportOutcome::SkippedEmpty => println!("  {:<28} (empty, skipped)", output.name),
                    ExportOutcome::Failed { reason } => println!("  {:<28} FAILED: {}", output.name, reason),
                }
            }
            println!(
                "{} polygons, {} outputs in {:.1}s",
                report.polygon_count,
                report.outputs.len(),
                start.elapsed().as_secs_f64()
            );
            Ok(if report.is_complete() { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
        Commands::DefaultConfig => {
            println!("{}", PipelineConfig::default().to_json_pretty()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            config.validate()?;
            println!(
                "Configuration version {} is valid ({} categories)",
                config.version,
                config.rules.categories.len()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            // Input resolution failures get their own exit code
            let input_error = e
                .downcast_ref::<SclError>()
                .map_or(false, SclError::is_fatal_for_run);
            if input_error {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
