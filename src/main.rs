//! wsbench - scripted WebSocket sessions
//!
//! Runs scenario scripts (connect, send, think) against a WebSocket target
//! and reports what happened.

use clap::Parser;
use commands::Commands;
use wsbench::common::logging;
use wsbench::{cli, commands};

#[derive(Parser)]
#[command(name = "wsbench", about = "Scripted WebSocket session runner")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command.log_file() {
        Some(path) => {
            logging::init_with_file(path);
        }
        None => logging::init_cli(),
    }

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
