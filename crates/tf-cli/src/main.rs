//! toyfit CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use tf_core::ExitStatus;
use tf_toys::{FitStore, Paths, RunOptions};

#[derive(Parser)]
#[command(name = "toyfit")]
#[command(about = "toyfit - toy Monte Carlo sample-and-fit studies")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sample-fit sequences over toy datasets
    FitToys {
        /// Configuration files (YAML or JSON), merged in order
        #[arg(required = true)]
        config: Vec<PathBuf>,

        /// Verbose fits (implies debug logging)
        #[arg(short, long)]
        verbose: bool,

        /// Store results under this directory and link them into the output location
        #[arg(long)]
        link_from: Option<PathBuf>,

        /// Base directory of toys and outputs (default: $TOYFIT_BASE_DIR or the working directory)
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Seed override (default: derived from the batch job id, else random)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Summarize the pulls of a stored toy study
    Summarize {
        /// Output name of the study
        name: String,

        /// Base directory of toys and outputs
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match &cli.command {
        Commands::FitToys { verbose: true, .. } => cli.log_level.max(tracing::Level::DEBUG),
        _ => cli.log_level,
    };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).with_writer(std::io::stderr).init();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dispatch(cli.command)));
    let status = match outcome {
        Ok(Ok(())) => ExitStatus::Success,
        Ok(Err(err)) => {
            let status = exit_status_of(&err);
            error!("{err:#}");
            status
        }
        Err(_) => {
            error!("uncaught error (panic) during run");
            ExitStatus::Uncaught
        }
    };
    ExitCode::from(status.code())
}

fn exit_status_of(err: &anyhow::Error) -> ExitStatus {
    err.downcast_ref::<tf_core::Error>().map_or(ExitStatus::Uncaught, tf_core::Error::exit_status)
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::FitToys { config, verbose, link_from, base_dir, seed } => {
            cmd_fit_toys(RunOptions { config_files: config, base_dir, link_from, seed, verbose })
        }
        Commands::Summarize { name, base_dir, output } => cmd_summarize(&name, base_dir, output.as_ref()),
        Commands::Version => {
            println!("toyfit {}", tf_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_fit_toys(options: RunOptions) -> Result<()> {
    let summary = tf_toys::run_toy_fits(&options)?;
    info!(
        output = %summary.output.display(),
        n_trials = summary.n_trials,
        rows = summary.n_rows,
        "toy fits finished"
    );
    write_json(None, serde_json::to_value(&summary)?)
}

fn cmd_summarize(name: &str, base_dir: Option<PathBuf>, output: Option<&PathBuf>) -> Result<()> {
    let paths = Paths::discover(base_dir.as_deref())?;
    let path = paths.fit_output_path(name);
    if !path.exists() {
        return Err(tf_core::Error::Input(format!("no fit results at {}", path.display())).into());
    }
    let store = FitStore::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let summaries = tf_toys::summarize_store(&store)?;
    write_json(output, serde_json::to_value(&summaries)?)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
