use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "quorum-agents")]
#[command(author, version, about = "Ask a fleet of LLMs, get one consensus answer", long_about = None)]
pub struct Args {
    /// TOML configuration file; QUORUM_* variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Ask every session one question and print the consensus
    Ask {
        question: String,

        /// Minimum supporters for a shared answer to win
        #[arg(long)]
        quorum: Option<usize>,

        /// Skip the evidence refinement round
        #[arg(long)]
        no_refine: bool,
    },

    /// Run one verification pass and print verified and abandoned endpoints
    Fleet,

    /// List the tool gateway catalog
    Tools,

    /// Threshold-tuning evaluation over a query file
    Eval {
        /// TOML file with [[query]] tables (question, acceptable)
        #[arg(long)]
        queries: PathBuf,

        /// CSV file rows are appended to
        #[arg(long)]
        out: PathBuf,
    },

    /// Context-capacity probe for one model
    Capacity {
        #[arg(long)]
        model: String,

        #[arg(long)]
        out: PathBuf,

        /// Growing-context steps (default 10)
        #[arg(long)]
        steps: Option<usize>,
    },
}
