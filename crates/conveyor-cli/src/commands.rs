//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a pipeline file
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "conveyor.yaml")]
        path: String,
    },

    /// Execute a pipeline once
    Run {
        /// Path to pipeline file
        #[arg(default_value = "conveyor.yaml")]
        path: String,

        /// Pipeline parameters as key=value pairs
        #[arg(short, long)]
        param: Vec<String>,

        /// Run deadline in seconds
        #[arg(short, long, default_value_t = 60)]
        timeout: u64,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Release every cron trigger of a pipeline once
    Poke {
        /// Path to pipeline file
        #[arg(default_value = "conveyor.yaml")]
        path: String,

        /// Pipeline parameters as key=value pairs
        #[arg(short, long)]
        param: Vec<String>,

        /// Only wait for trigger points within this many seconds
        #[arg(short, long, default_value_t = 60)]
        window: u64,

        /// Directory the release log is persisted under
        #[arg(long, default_value = ".conveyor/releases")]
        log_dir: String,
    },
}
