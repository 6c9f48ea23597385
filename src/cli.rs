//! CLI surface (C8) — argument parsing only. `main.rs` owns process wiring.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "pipewatch", about = "Watch an agent's log for stalled or derailed node sequences", version)]
pub struct Cli {
    /// Path to the INI-style watchdog config file.
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Load the config, print a summary, and exit without starting the engine.
    #[arg(long)]
    pub status: bool,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn tracing_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
