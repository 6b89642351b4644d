use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    /// Base URL of the chunkup server
    #[arg(env = "CHUNKUP_SERVER", long, short, default_value = "http://localhost:8090/")]
    pub server: Url,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a file in 5 MiB chunks, one chunk at a time [alias: up]
    #[command(alias = "up")]
    Upload { file: Option<PathBuf> },
    /// Show how a file would be split into chunks
    Plan { file: PathBuf },
}
