//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Orchid - LLM coding agents over a goal graph
#[derive(Parser, Debug)]
#[command(name = "orchid")]
#[command(version)]
#[command(about = "Runs LLM coding agents against a dependency-ordered goal graph")]
#[command(
    long_about = "Orchid seeds projects and goals from a plan file, then keeps a watcher sweeping them: ready goals get workers, orphaned goals get reassigned and idle agents get nudged."
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed the plan and run the watcher until every goal is completed
    Run {
        /// Plan file with projects and goals
        #[arg(short, long)]
        plan: Option<PathBuf>,
    },

    /// Print dependency layers per project
    Plan {
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Print the goals a fresh run starts with
    Ready {
        #[arg(short, long)]
        plan: PathBuf,
    },
}
