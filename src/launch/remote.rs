//! Remote session launcher
//!
//! Runs one participant's launcher on its host through the remote shell
//! (`ssh -t -t <host> <launcher...>` by default), bounds its runtime and
//! captures its output.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

use crate::common::{Error, Result};
use crate::orchestrator::registry::{Registration, Registry, TaskPhase};
use crate::testenv::{macros, ClientSpec};

use super::output;

/// Attempts at collecting the output stream after the session exited
const OUTPUT_COLLECT_ATTEMPTS: u32 = 5;

/// Interval between exit checks while a session runs
const REAP_POLL: Duration = Duration::from_millis(20);

/// Result of one completed remote session
#[derive(Debug, Clone)]
pub struct LaunchOutput {
    pub client: String,
    pub host: String,
    /// Command line actually run locally
    pub command: Vec<String>,
    /// Exit code, `None` when the session ended by a signal
    pub exit_code: Option<i32>,
    /// Whether the session was terminated at the end of `TEST_DURATION`
    pub terminated: bool,
    /// Captured stdout, made printable
    pub output: String,
}

/// Launches remote sessions; cheap to clone into each task
#[derive(Debug, Clone)]
pub struct RemoteLauncher {
    shell: Vec<String>,
    drain_poll: Duration,
    registry: Registry,
    shutdown: watch::Receiver<bool>,
}

impl RemoteLauncher {
    pub fn new(
        shell: Vec<String>,
        drain_poll: Duration,
        registry: Registry,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shell,
            drain_poll,
            registry,
            shutdown,
        }
    }

    /// Build the local command line for `spec`
    ///
    /// Fails without side effects if the launcher has unresolved macros or
    /// is empty, or if no host is configured.
    pub fn command_line(&self, spec: &ClientSpec) -> Result<(String, Vec<String>)> {
        let launcher = macros::expand(&spec.launcher, &spec.env);
        if macros::has_macros(&launcher) {
            return Err(Error::unexpanded(&spec.name, "launcher", &launcher));
        }
        let words: Vec<&str> = launcher.split_whitespace().collect();
        if words.is_empty() {
            return Err(Error::MissingLauncher {
                client: spec.name.clone(),
            });
        }
        let host = spec.host.clone().ok_or_else(|| Error::MissingHost {
            client: spec.name.clone(),
        })?;

        let mut command = self.shell.clone();
        command.push(host.clone());
        command.extend(words.into_iter().map(str::to_string));
        Ok((host, command))
    }

    /// Run `spec` to completion
    #[tracing::instrument(skip_all, fields(client = %spec.name))]
    pub async fn launch(&self, spec: &ClientSpec) -> Result<LaunchOutput> {
        let client = spec.name.as_str();

        self.registry.set_phase(client, TaskPhase::Delaying);
        if let Some(delay) = spec.start_delay().filter(|d| !d.is_zero()) {
            tracing::debug!("Waiting TEST_START_DELAY {:?}", delay);
            if !self.pause(delay).await {
                return Err(Error::Cancelled(client.to_string()));
            }
        }

        let (host, command) = self.command_line(spec)?;
        tracing::info!(host = %host, "Launching: {}", command.join(" "));

        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Internal("empty remote shell".to_string()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::SpawnFailed {
                client: client.to_string(),
                host: host.clone(),
                source,
            })?;

        let id = match self.registry.register_process(client, child.id()) {
            Registration::Registered(id) => id,
            Registration::Closed => {
                tracing::debug!("Teardown in progress, abandoning new session");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::Cancelled(client.to_string()));
            }
        };

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::communication(client, "stdout not captured"))?;
        let mut reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        let mut terminated = false;
        if let Some(duration) = spec.duration() {
            tracing::info!("Sleeping for TEST_DURATION {:?}", duration);
            self.pause(duration).await;
            tracing::info!("Terminating remote session");
            terminated = self.registry.terminate(id);
            #[cfg(not(unix))]
            {
                terminated = child.start_kill().is_ok();
            }
        }

        // Reaped through the registry so teardown never signals a reused pid
        let status = loop {
            match self.registry.reap(id, &mut child) {
                Ok(Some(status)) => break status,
                Ok(None) => tokio::time::sleep(REAP_POLL).await,
                Err(e) => {
                    self.registry.mark_exited(id, None);
                    reader.abort();
                    return Err(Error::communication(client, e.to_string()));
                }
            }
        };

        let mut raw = None;
        for _ in 0..OUTPUT_COLLECT_ATTEMPTS {
            if let Ok(joined) = tokio::time::timeout(self.drain_poll, &mut reader).await {
                raw = Some(joined);
                break;
            }
        }
        let raw = match raw {
            Some(Ok(Ok(buf))) => buf,
            Some(Ok(Err(e))) => return Err(Error::communication(client, e.to_string())),
            Some(Err(e)) => return Err(Error::communication(client, e.to_string())),
            None => {
                reader.abort();
                return Err(Error::communication(
                    client,
                    "output still open after the session exited",
                ));
            }
        };

        tracing::info!(exit_code = ?status.code(), "Remote session done");
        Ok(LaunchOutput {
            client: client.to_string(),
            host,
            command,
            exit_code: status.code(),
            terminated,
            output: output::make_printable(&raw),
        })
    }

    /// Sleep for `duration`; returns false if shutdown was requested first
    async fn pause(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown_requested(&mut shutdown) => false,
        }
    }
}

/// Resolves once shutdown is requested; never if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
