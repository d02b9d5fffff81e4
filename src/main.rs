//! stepharness - declarative step-based integration testing
//!
//! Runs YAML test cases from the command line and reports the outcome.

use clap::Parser;
use stepharness::{cli, commands, common};
use commands::Commands;

#[derive(Parser)]
#[command(name = "stepharness", about = "Declarative step-based integration test runner")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so the file writer flushes
    let _guard = match common::logging::init_cli(cli.command.log_file().as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to open log file: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
