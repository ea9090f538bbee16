//! Operator-facing output

use colored::Colorize;

use crate::orchestrator::{ClientOutcome, Reporter, RunReport};

/// Prints each participant's result to stdout as it completes
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&mut self, outcome: &ClientOutcome) {
        match &outcome.result {
            Ok(out) => {
                let status = match (out.exit_code, out.terminated) {
                    (_, true) => "terminated after TEST_DURATION".to_string(),
                    (Some(code), false) => format!("exit {code}"),
                    (None, false) => "killed".to_string(),
                };
                println!(
                    "{} {} ({}) on {}: {}",
                    "✓".green(),
                    outcome.name.bold(),
                    outcome.role,
                    out.host,
                    status
                );
                for line in out.output.lines() {
                    println!("    {}", line.dimmed());
                }
            }
            Err(e) => {
                println!(
                    "{} {} ({}): {} [{}]",
                    "✗".red(),
                    outcome.name.bold(),
                    outcome.role,
                    e,
                    e.class()
                );
            }
        }
    }
}

/// Print the end-of-run summary
pub fn print_summary(report: &RunReport) {
    println!();
    if let Some(reason) = &report.aborted {
        println!("{} {}", "Aborted:".yellow().bold(), reason);
    }
    let counts = format!(
        "{} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
    if report.failed() == 0 {
        println!("{} {}", "Done:".green().bold(), counts);
    } else {
        println!("{} {}", "Done:".red().bold(), counts);
    }

    let t = &report.teardown;
    if t.remote_kills > 0 || !t.killed.is_empty() || !t.cancelled.is_empty() {
        println!(
            "  teardown: {} remote kills, {} killed, {} cancelled",
            t.remote_kills,
            t.killed.len(),
            t.cancelled.len()
        );
    }
    if !t.is_clean() {
        println!("  {} {} kill attempts failed", "!".red(), t.failures);
    }
}
