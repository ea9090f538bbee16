//! Stress test manager CLI
//!
//! Launches a test's clients and servers on remote hosts, collects their
//! output and tears everything down when the test ends or is interrupted.

use clap::Parser;
use stresstest::cli;
use stresstest::commands::{Commands, GlobalOptions};

#[derive(Parser)]
#[command(name = "stresstest", about = "Distributed stress test manager")]
#[command(version, long_about = None)]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli::dispatch(cli.command, cli.options).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
