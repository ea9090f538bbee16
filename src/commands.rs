//! CLI command definitions
//!
//! Defines the clap commands for the stress test manager.

use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Log debug details
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Engine configuration file (default: <config dir>/stresstest/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding stressTestDefault.env and the launch scripts
    #[arg(long, global = true)]
    pub script_dir: Option<PathBuf>,

    /// Remote shell command, e.g. "ssh -t -t"
    #[arg(long, global = true)]
    pub remote_shell: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every client and server of a test directory once
    Run {
        /// Test directory holding test.env and one <name>.env per participant
        #[arg(long, short = 't')]
        test_dir: PathBuf,
    },

    /// Wait for startTest markers and run the test each time one appears
    Watch {
        /// Test directory to watch
        #[arg(long, short = 't')]
        test_dir: PathBuf,
    },

    /// Print the resolved configuration of one participant
    Show {
        /// Test directory holding the participant
        #[arg(long, short = 't')]
        test_dir: PathBuf,

        /// Participant name, i.e. the stem of its .env file
        client: String,
    },
}
