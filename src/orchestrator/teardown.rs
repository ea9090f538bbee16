//! Teardown of a running test
//!
//! Runs at most once per orchestrator, whether the test finished on its own
//! or was aborted. The order is fixed:
//!
//! 1. run every `*.killer` marker on its host
//! 2. hard-kill local remote-shell processes still alive
//! 3. cancel unstarted client tasks, then unstarted server tasks
//! 4. cancel anything else still unstarted
//! 5. wait for every task and clear the registry

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::common::{Error, Result};
use crate::testenv::Role;

use super::{Orchestrator, Reporter, Step};

/// Extension of remote kill marker files
pub const KILL_MARKER_EXT: &str = "killer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

/// What one teardown did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Teardown had already run; nothing was done
    pub skipped: bool,
    /// Kill markers run successfully
    pub remote_kills: usize,
    /// Clients whose processes were hard-killed
    pub killed: Vec<String>,
    /// Tasks cancelled before they started a session
    pub cancelled: Vec<String>,
    /// Kill attempts that failed
    pub failures: usize,
}

impl TeardownSummary {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Kill markers one directory below `test_root`, as `(host, path)`
///
/// The host is the name of the directory holding the marker.
pub fn find_kill_markers(test_root: &Path) -> Vec<(String, PathBuf)> {
    let Ok(hosts) = std::fs::read_dir(test_root) else {
        return Vec::new();
    };

    let mut markers = Vec::new();
    for host_dir in hosts.flatten() {
        let dir = host_dir.path();
        if !dir.is_dir() {
            continue;
        }
        let host = host_dir.file_name().to_string_lossy().into_owned();
        let Ok(files) = std::fs::read_dir(&dir) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.is_file() && path.extension().is_some_and(|e| e == KILL_MARKER_EXT) {
                markers.push((host.clone(), path));
            }
        }
    }
    markers.sort();
    markers
}

/// Run one kill marker through the remote shell, bounded by `limit`
pub async fn run_kill_marker(
    shell: &[String],
    host: &str,
    marker: &Path,
    limit: Duration,
) -> Result<()> {
    let (program, args) = shell
        .split_first()
        .ok_or_else(|| Error::Internal("empty remote shell".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .arg(host)
        .arg(marker)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::RemoteKillFailed {
            host: host.to_string(),
            message: e.to_string(),
        })?;

    let status = match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status.map_err(|e| Error::RemoteKillFailed {
            host: host.to_string(),
            message: e.to_string(),
        })?,
        Err(_) => {
            return Err(Error::RemoteKillFailed {
                host: host.to_string(),
                message: format!("{} timed out after {:?}", marker.display(), limit),
            })
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(Error::RemoteKillFailed {
            host: host.to_string(),
            message: format!("{} exited with {}", marker.display(), status),
        })
    }
}

impl Orchestrator {
    /// Stop everything this orchestrator started
    ///
    /// Only the first call does anything; later calls return a skipped
    /// summary. Outcomes of tasks that finish meanwhile go to `reporter`.
    pub async fn shutdown<R: Reporter>(&mut self, reporter: &mut R) -> TeardownSummary {
        if self.state != LifecycleState::Running {
            tracing::debug!(state = ?self.state, "Teardown already done");
            return TeardownSummary {
                skipped: true,
                ..Default::default()
            };
        }
        self.state = LifecycleState::Draining;
        tracing::info!("Tearing down");

        // No session may register from here on
        self.registry.close();
        let mut summary = TeardownSummary::default();

        if let Some(root) = self.test_root.clone() {
            for (host, marker) in find_kill_markers(&root) {
                tracing::info!(host = %host, "Running {}", marker.display());
                match run_kill_marker(&self.shell, &host, &marker, self.remote_kill_timeout).await {
                    Ok(()) => summary.remote_kills += 1,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        summary.failures += 1;
                    }
                }
            }
        }

        let (killed, failures) = self.registry.kill_live();
        summary.killed = killed;
        summary.failures += failures;

        summary.cancelled = self.registry.cancel_unstarted(Some(Role::Client));
        summary
            .cancelled
            .extend(self.registry.cancel_unstarted(Some(Role::Server)));
        summary.cancelled.extend(self.registry.cancel_unstarted(None));
        if !summary.cancelled.is_empty() {
            tracing::info!("Cancelled before start: {}", summary.cancelled.join(", "));
        }

        // Wake tasks sleeping through TEST_DURATION
        let _ = self.shutdown_tx.send(true);

        while !self.tasks.is_empty() {
            let step = tokio::select! {
                Some(control) = self.control_rx.recv() => Step::Control(control),
                joined = self.tasks.join_next_with_id() => Step::Joined(joined),
            };
            match step {
                Step::Control(control) => {
                    tracing::info!("Ignoring {:?}, teardown in progress", control)
                }
                Step::Joined(Some(joined)) => self.record(joined, reporter),
                Step::Joined(None) | Step::Idle => break,
            }
        }

        let leftover = self.registry.drain_processes();
        let still_live = leftover.iter().filter(|p| p.state.is_live()).count();
        if still_live > 0 {
            tracing::warn!("{} processes exited without being observed", still_live);
        }

        self.state = LifecycleState::Stopped;
        tracing::info!(
            remote_kills = summary.remote_kills,
            killed = summary.killed.len(),
            cancelled = summary.cancelled.len(),
            failures = summary.failures,
            "Teardown complete"
        );
        summary
    }
}
