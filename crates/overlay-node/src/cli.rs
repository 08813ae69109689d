use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Demo node binary wiring the overlay sync engine's submission pipeline
/// and GASP sync orchestrator to in-memory storage.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to a JSON node configuration file (topics, sync modes,
    /// GASP tuning). Without this flag the node starts with no
    /// configured topics.
    #[arg(long, env = "OVERLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the config file's GASP request concurrency.
    #[arg(long)]
    pub gasp_concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build and submit a synthetic demo transaction to a topic, printing
    /// the resulting admittance outcome.
    Submit {
        /// Topic to submit into. Registered automatically with a
        /// permissive demo admissibility policy if not already present
        /// in the config file.
        #[arg(long)]
        topic: String,

        /// Number of outputs the synthetic transaction produces.
        #[arg(long, default_value = "1")]
        outputs: usize,
    },
    /// Run one round of peer discovery and GASP sync for every
    /// configured topic.
    Sync,
}
