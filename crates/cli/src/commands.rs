use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Read a directory of CSV files (one per partition) into a JSON-lines file
    Run(RunArgs),

    Offsets {
        #[command(subcommand)]
        command: OffsetsCommand,
    },
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(long, help = "Pipeline settings file (JSON)")]
    pub config: PathBuf,

    #[arg(long, help = "Directory holding the CSV files to ingest")]
    pub input: PathBuf,

    #[arg(long, help = "JSON-lines output file, overrides target.path")]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = ',', help = "CSV field delimiter")]
    pub delimiter: char,

    #[arg(long, help = "The CSV files have no header row")]
    pub no_headers: bool,

    #[arg(long, help = "Read everything without writing output or persisting offsets")]
    pub preview: bool,

    #[arg(
        long,
        help = "Keep polling for new rows after every partition is drained, until interrupted"
    )]
    pub follow: bool,

    #[arg(
        long,
        help = "If specified, writes the JSON run report to this file instead of stdout"
    )]
    pub report: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum OffsetsCommand {
    /// Print the stored offsets of a pipeline
    Show {
        #[arg(long, help = "Pipeline settings file (JSON)")]
        config: PathBuf,

        #[arg(long, help = "Print the offsets as JSON instead of a table")]
        json: bool,
    },
    /// Forget every stored offset so the next run starts from the beginning
    Reset {
        #[arg(long, help = "Pipeline settings file (JSON)")]
        config: PathBuf,
    },
}
