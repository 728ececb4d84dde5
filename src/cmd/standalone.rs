use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::standalone::job::DEFAULT_MAX_RETRIES;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Root directory of the tag store
    #[clap(long, global = true, default_value = ".mrlite")]
    pub store: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job and print its output
    Run {
        /// Glob spec for the input files
        #[arg(short, long, required_unless_present = "tag", conflicts_with = "tag")]
        input: Option<String>,

        /// Read input from these tags instead of files
        #[arg(short, long, num_args = 1..)]
        tag: Vec<String>,

        /// Name of the workload
        #[arg(short, long)]
        workload: String,

        /// Output file. Prints to stdout if not given
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of reduce partitions
        #[arg(short = 'r', long, default_value_t = 1)]
        partitions: u32,

        /// Maximum number of tasks running at once (defaults to the number of CPUs)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Retries per task before the job fails
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Cancel the job after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print job statistics as JSON to stderr
        #[arg(long)]
        stats: bool,
    },
    /// Load a text file into a tag, one blob per chunk of lines
    Load {
        /// Tag to load into. An existing tag is overwritten
        tag: String,

        /// File to load
        path: PathBuf,

        /// Lines per blob
        #[arg(short, long, default_value_t = 10_000)]
        chunk: usize,
    },
    /// Delete a tag
    Delete {
        tag: String,
    },
}
