pub mod config;
pub mod santiment;
pub mod table;
pub mod update;

use clap::Parser;
use std::path::PathBuf;

/// CLI args
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Santiment metrics -> Pine Seeds daily CSV updater (merge by date)"
)]
pub struct UpdateArgs {
    /// Directory holding the CSV files; created if missing
    #[arg(long, default_value = ".")]
    pub data_folder: PathBuf,

    /// JSON file overriding coins, metrics, range start, interval or endpoint
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Optional lock file path to prevent concurrent runs
    #[arg(long)]
    pub lock_file: Option<PathBuf>,
}
