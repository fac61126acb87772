//! fastNLO table tool

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ns_fastnlo::{FastNloTable, MergeWeighting, ReadOptions, TableSummary};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fastnlo_tool")]
#[command(about = "Inspect, validate and merge fastNLO coefficient tables")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Reader options (JSON). Missing keys take their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a JSON summary of a table
    Inspect {
        /// Input table
        input: PathBuf,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read a table and check that re-encoding reproduces it exactly
    Check {
        /// Input tables
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Merge statistically independent tables of one observable
    Merge {
        /// Input tables (at least two)
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,

        /// Output table
        #[arg(short, long)]
        output: PathBuf,

        /// Combination option (add, merge, unweighted, wgtnevt, numevent,
        /// sumw2, sumsig2, numeventbinproc, sumw2binproc, sumsig2binproc)
        #[arg(short, long, default_value = "merge")]
        weighting: MergeWeighting,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    let options = load_options(cli.config.as_ref())?;
    match cli.command {
        Commands::Inspect { input, output } => cmd_inspect(&input, output.as_ref(), &options),
        Commands::Check { inputs } => cmd_check(&inputs, &options),
        Commands::Merge { inputs, output, weighting } => {
            cmd_merge(&inputs, &output, weighting, &options)
        }
    }
}

fn load_options(path: Option<&PathBuf>) -> Result<ReadOptions> {
    let Some(path) = path else {
        return Ok(ReadOptions::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading options {}", path.display()))?;
    ReadOptions::from_json_str(&json).with_context(|| format!("parsing options {}", path.display()))
}

fn load_table(path: &PathBuf, options: &ReadOptions) -> Result<FastNloTable> {
    tracing::info!(path = %path.display(), "reading table");
    let table = FastNloTable::open_with(path, options)
        .with_context(|| format!("reading table {}", path.display()))?;
    tracing::info!(
        version = table.version(),
        bins = table.n_obs_bins(),
        contributions = table.contributions().len(),
        "table loaded"
    );
    Ok(table)
}

fn cmd_inspect(input: &PathBuf, output: Option<&PathBuf>, options: &ReadOptions) -> Result<()> {
    let table = load_table(input, options)?;
    let json = TableSummary::new(&table).to_json_pretty()?;
    if let Some(path) = output {
        std::fs::write(path, json)?;
    } else {
        println!("{json}");
    }
    Ok(())
}

fn cmd_check(inputs: &[PathBuf], options: &ReadOptions) -> Result<()> {
    let mut failed = 0usize;
    for input in inputs {
        let original = std::fs::read(input)?;
        let table = load_table(input, options)?;
        let identical = table.write_string().as_bytes() == original.as_slice();
        for d in table.diagnostics().entries() {
            println!("{}: warning: {}: {}", input.display(), d.field, d.message);
        }
        if identical {
            println!("{}: ok", input.display());
        } else {
            println!("{}: re-encoded table differs from input", input.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} tables do not round-trip", inputs.len());
    }
    Ok(())
}

fn cmd_merge(
    inputs: &[PathBuf],
    output: &PathBuf,
    weighting: MergeWeighting,
    options: &ReadOptions,
) -> Result<()> {
    let Some((first, rest)) = inputs.split_first() else {
        bail!("no input tables");
    };
    let mut merged = load_table(first, options)?;
    for input in rest {
        let table = load_table(input, options)?;
        merged
            .merge(&table, weighting)
            .with_context(|| format!("merging {} into {}", input.display(), first.display()))?;
    }
    merged.write_file(output).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(path = %output.display(), tables = inputs.len(), %weighting, "merged table written");
    Ok(())
}
