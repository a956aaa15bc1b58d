// eddynet CLI
// Builds overlap networks from per-step eddy datasets and inspects the results

mod inspect;

use anyhow::Result;
use clap::{Parser, Subcommand};
use eddynet_common::{eddynet_version, Dataset, DEFAULT_COMPRESSION_LEVEL};
use eddynet_core::{Network, NetworkConfig, OverlapConfig};
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eddynet")]
#[command(version, about = "Link eddy observations into overlap networks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Group overlapping observations of all matching files and write the merged dataset
    Network {
        /// Glob pattern selecting one dataset per time step (sorted by name)
        pattern: String,

        /// Output dataset path
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Number of following steps each step is compared with
        #[arg(short = 'w', long, default_value_t = 5)]
        window: usize,

        /// Compare speed contours instead of effective contours
        #[arg(long)]
        intern: bool,

        /// Minimum overlap score, exclusive
        #[arg(long, default_value_t = 0.2)]
        threshold: f64,

        /// Score by intersection over the smaller area instead of the union
        #[arg(long)]
        minimal_area: bool,

        /// ZSTD compression level of the output
        #[arg(short = 'c', long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
        compression_level: i32,

        /// Verbosity level (0=warnings, 1=summary, 2=per file, 3=per pair)
        #[arg(short = 'v', long, default_value_t = 1)]
        verbosity: u32,
    },

    /// Display dimensions, attributes and variables of a dataset
    Info {
        /// Input dataset path
        dataset: PathBuf,
    },

    /// Print the values of one variable, one record per line
    Dump {
        /// Input dataset path
        dataset: PathBuf,

        /// Variable name
        variable: String,

        /// Maximum number of records to print
        #[arg(short = 'n', long)]
        rows: Option<usize>,
    },
}

fn init_logging(verbosity: u32) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Network {
            pattern,
            output,
            window,
            intern,
            threshold,
            minimal_area,
            compression_level,
            verbosity,
        } => {
            init_logging(verbosity);
            let config = NetworkConfig {
                window,
                intern,
                overlap: OverlapConfig {
                    threshold,
                    minimal_area,
                },
                compression_level,
            };
            network_command(&pattern, output, config)?
        }

        Commands::Info { dataset } => {
            init_logging(0);
            let ds = Dataset::open(&dataset)?;
            print!("{}", inspect::info_report(&ds)?);
        }

        Commands::Dump {
            dataset,
            variable,
            rows,
        } => {
            init_logging(0);
            let mut ds = Dataset::open(&dataset)?;
            for line in inspect::dump_rows(&mut ds, &variable, rows)? {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn network_command(pattern: &str, output: PathBuf, config: NetworkConfig) -> Result<()> {
    let network = Network::new(pattern, config)?;
    if network.filenames().is_empty() {
        anyhow::bail!("No input files match {pattern:?}");
    }
    info!("{}", eddynet_version());
    info!(
        files = network.filenames().len(),
        window = config.window,
        threshold = config.overlap.threshold,
        intern = config.intern,
        "building network"
    );

    let assignment = network.group_observations()?;
    let stats = network.save(&assignment, &output)?;
    info!(
        output = %output.display(),
        observations = stats.observations,
        groups = assignment.summary().groups,
        "network written"
    );
    Ok(())
}
