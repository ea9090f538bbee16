//! CLI command handling
//!
//! Loads the engine configuration, then runs, watches or inspects a test
//! directory.

mod report;

pub use report::ConsoleReporter;

use std::path::Path;

use colored::Colorize;

use crate::commands::{Commands, GlobalOptions};
use crate::common::config::Config;
use crate::common::{logging, Error, Result};
use crate::orchestrator::{signals, Orchestrator};
use crate::supervisor::Supervisor;
use crate::testenv::{client, Cascade, ClientSpec, TestPlan};

/// Dispatch a CLI command
///
/// Returns whether the command completed cleanly; per-participant failures
/// are reported, not returned.
pub async fn dispatch(command: Commands, options: GlobalOptions) -> Result<bool> {
    let config = load_config(&options)?;
    logging::init(options.verbose, config.logging.file.as_deref());

    match command {
        Commands::Run { test_dir } => run(config, &test_dir).await,

        Commands::Watch { test_dir } => {
            let shell = config.remote_shell()?;
            let test_root = test_dir.canonicalize().unwrap_or(test_dir);
            Supervisor::new(config, shell, test_root, ConsoleReporter)
                .run()
                .await
        }

        Commands::Show { test_dir, client } => {
            show(&config, &test_dir, &client)?;
            Ok(true)
        }
    }
}

/// Engine configuration with command-line overrides applied
pub fn load_config(options: &GlobalOptions) -> Result<Config> {
    let mut config = Config::load(options.config.as_deref())?;
    if let Some(dir) = &options.script_dir {
        config.engine.script_dir = Some(dir.clone());
    }
    if let Some(shell) = &options.remote_shell {
        config.engine.remote_shell = shell.split_whitespace().map(str::to_string).collect();
    }
    Ok(config)
}

async fn run(config: Config, test_dir: &Path) -> Result<bool> {
    let test_root = test_dir.canonicalize().unwrap_or_else(|_| test_dir.to_path_buf());
    let plan = TestPlan::load(&Cascade::from_config(&config, &test_root))?;
    let shell = config.remote_shell()?;

    let mut orchestrator = Orchestrator::new(&config, shell);
    let listener = signals::spawn_listener(orchestrator.control())?;

    let report = orchestrator.run_test(plan, &mut ConsoleReporter).await?;
    listener.abort();

    report::print_summary(&report);
    Ok(report.teardown.is_clean())
}

fn show(config: &Config, test_dir: &Path, name: &str) -> Result<()> {
    if !test_dir.is_dir() {
        return Err(Error::TestRootNotFound(test_dir.to_path_buf()));
    }
    let role = client::discover(test_dir)?
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, role)| role)
        .ok_or_else(|| Error::UnknownClient(name.to_string()))?;

    let cascade = Cascade::from_config(config, test_dir);
    let env = cascade.resolve(name);
    let app_type = env
        .get(crate::testenv::keys::TEST_APPTYPE)
        .map(String::as_str)
        .filter(|t| !t.is_empty());

    println!("{} {} ({})", "Participant:".bold(), name, role);
    println!("{}", "Sources:".bold());
    for source in cascade.sources(name, app_type) {
        if source.is_file() {
            println!("  {} {}", "✓".green(), source.display());
        } else {
            println!("  {} {}", "-".dimmed(), source.display().to_string().dimmed());
        }
    }

    println!("{}", "Resolved:".bold());
    for (key, value) in &env {
        println!("  {key}={value}");
    }

    match ClientSpec::from_mapping(name, role, env) {
        Ok(spec) => {
            println!("{}", "Launch:".bold());
            println!("  host:        {}", spec.host.as_deref().unwrap_or("<none>"));
            println!("  launcher:    {}", spec.launcher);
            if let Some(delay) = spec.start_delay() {
                println!("  start delay: {:?}", delay);
            }
            if let Some(duration) = spec.duration() {
                println!("  duration:    {:?}", duration);
            }
        }
        Err(e) => println!("{} {}", "✗".red(), e),
    }
    Ok(())
}
