//! Command-line arguments.

use clap::{Args, Parser, Subcommand};
use grid_common::{GroupIndex, OpenOptions};

/// Dataset CLI
#[derive(Parser, Debug)]
#[command(name = "dataset-cli")]
#[command(about = "List and describe dataset variables through the dataset cache")]
pub struct Cli {
    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Number of worker threads
    #[arg(long, env = "DATASET_WORKER_THREADS")]
    pub worker_threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the data variables of a dataset
    Variables {
        #[command(flatten)]
        dataset: DatasetArgs,
    },

    /// Describe one variable after coordinate normalization
    Info {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Variable name
        #[arg(long)]
        variable: String,

        /// Select one step of an extra dimension and drop it ("dim=value")
        #[arg(long)]
        drop_dim: Option<String>,

        /// List the time steps of the dataset
        #[arg(long)]
        show_times: bool,
    },
}

impl Command {
    pub fn dataset(&self) -> &DatasetArgs {
        match self {
            Command::Variables { dataset } | Command::Info { dataset, .. } => dataset,
        }
    }
}

/// How to open the dataset.
#[derive(Args, Debug, Clone)]
pub struct DatasetArgs {
    /// Dataset locator (local path, file://, s3://, http(s)://)
    pub locator: String,

    /// Sub-group (zoom level) of a multiscale store
    #[arg(long)]
    pub group: Option<GroupIndex>,

    /// The locator is a reference manifest
    #[arg(long)]
    pub reference: bool,

    /// Keep time coordinates as raw numbers
    #[arg(long)]
    pub no_decode_times: bool,

    /// Ignore consolidated metadata and list the store instead
    #[arg(long)]
    pub no_consolidated: bool,

    /// Anonymous object storage access; defaults to DATASET_ANON_DEFAULT
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub anon: Option<bool>,
}

impl DatasetArgs {
    /// Apply the flags on top of the opener's defaults.
    pub fn options(&self, defaults: OpenOptions) -> OpenOptions {
        let anon = self.anon.unwrap_or(defaults.anon);
        defaults
            .with_group(self.group)
            .with_reference(self.reference)
            .with_decode_times(!self.no_decode_times)
            .with_consolidated(!self.no_consolidated)
            .with_anon(anon)
    }
}
