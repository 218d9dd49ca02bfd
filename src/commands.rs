//! CLI command definitions
//!
//! Defines the clap commands for the wsbench CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario script against its target
    Run {
        /// Path to the script (YAML, or JSON with a .json extension)
        script: PathBuf,

        /// Number of sessions to launch (default from config, else 1)
        #[arg(long, short = 'n')]
        sessions: Option<usize>,

        /// Target URL, used when the script does not name one
        #[arg(long, short)]
        target: Option<String>,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Load and compile a script without connecting, then list its steps
    Check {
        /// Path to the script
        script: PathBuf,
    },
}

impl Commands {
    /// Log file requested on the command line, if any
    pub fn log_file(&self) -> Option<&std::path::Path> {
        match self {
            Commands::Run { log_file, .. } => log_file.as_deref(),
            Commands::Check { .. } => None,
        }
    }
}
