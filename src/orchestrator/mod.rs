//! Test run orchestration
//!
//! An [`Orchestrator`] runs one test: it writes the derived artifacts,
//! starts one launch task per participant (servers first), streams each
//! outcome to a [`Reporter`] as it completes and tears everything down
//! at the end or on abort.

pub mod artifacts;
pub mod registry;
pub mod signals;
pub mod teardown;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{Id, JoinError, JoinSet};

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::launch::{LaunchOutput, RemoteLauncher};
use crate::testenv::{Role, TestPlan};

pub use registry::Registry;
pub use teardown::{LifecycleState, TeardownSummary};

/// Requests delivered to a running orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Stop the test now
    Abort { reason: String },
}

/// Cloneable sender of [`Control`] requests
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl ControlHandle {
    /// A handle and the receiving end it feeds
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Control>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Ask the orchestrator to abort; false if it is gone
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(Control::Abort {
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Final result of one participant
#[derive(Debug)]
pub struct ClientOutcome {
    pub name: String,
    pub role: Role,
    pub result: Result<LaunchOutput>,
}

/// Receives outcomes as participants complete
pub trait Reporter {
    fn report(&mut self, outcome: &ClientOutcome);
}

impl<F: FnMut(&ClientOutcome)> Reporter for F {
    fn report(&mut self, outcome: &ClientOutcome) {
        self(outcome)
    }
}

/// Everything that happened during one run
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<ClientOutcome>,
    /// Reason given for an abort, if the run was aborted
    pub aborted: Option<String>,
    pub teardown: TeardownSummary,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

type Joined = std::result::Result<(Id, Result<LaunchOutput>), JoinError>;

/// One wakeup of the orchestrator loop
enum Step {
    Control(Control),
    Joined(Option<Joined>),
    Idle,
}

pub struct Orchestrator {
    shell: Vec<String>,
    poll_interval: Duration,
    remote_kill_timeout: Duration,
    registry: Registry,
    launcher: RemoteLauncher,
    shutdown_tx: watch::Sender<bool>,
    control: ControlHandle,
    control_rx: mpsc::UnboundedReceiver<Control>,
    tasks: JoinSet<Result<LaunchOutput>>,
    task_names: HashMap<Id, (String, Role)>,
    outcomes: Vec<ClientOutcome>,
    test_root: Option<PathBuf>,
    state: LifecycleState,
}

impl Orchestrator {
    /// Create an orchestrator using an already resolved remote shell
    pub fn new(config: &Config, shell: Vec<String>) -> Self {
        let registry = Registry::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (control, control_rx) = ControlHandle::channel();
        let launcher = RemoteLauncher::new(
            shell.clone(),
            config.timeouts.drain_poll(),
            registry.clone(),
            shutdown_rx,
        );

        Self {
            shell,
            poll_interval: config.timeouts.poll_interval(),
            remote_kill_timeout: config.timeouts.remote_kill(),
            registry,
            launcher,
            shutdown_tx,
            control,
            control_rx,
            tasks: JoinSet::new(),
            task_names: HashMap::new(),
            outcomes: Vec::new(),
            test_root: None,
            state: LifecycleState::Running,
        }
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run `plan` to completion or abort, then tear down
    ///
    /// Per-participant failures are reported, never returned. The only
    /// error is reusing an orchestrator that already ran.
    pub async fn run_test<R: Reporter>(
        &mut self,
        mut plan: TestPlan,
        reporter: &mut R,
    ) -> Result<RunReport> {
        if self.state != LifecycleState::Running || self.test_root.is_some() {
            return Err(Error::Internal("orchestrator already ran a test".to_string()));
        }
        self.test_root = Some(plan.test_root().to_path_buf());
        tracing::info!(test = %plan.test_name, "Starting {} participants", plan.len());

        artifacts::materialize(&plan);

        for rejected in std::mem::take(&mut plan.rejected) {
            let outcome = ClientOutcome {
                name: rejected.name,
                role: rejected.role,
                result: Err(rejected.error),
            };
            reporter.report(&outcome);
            self.outcomes.push(outcome);
        }

        let TestPlan {
            servers, clients, ..
        } = plan;
        for spec in servers.into_iter().chain(clients) {
            let name = spec.name.clone();
            let role = spec.role;
            self.registry.track_task(&name, role);
            let launcher = self.launcher.clone();
            let handle = self
                .tasks
                .spawn(async move { launcher.launch(&spec).await });
            self.task_names.insert(handle.id(), (name.clone(), role));
            self.registry.set_abort_handle(&name, handle);
        }

        let mut aborted = None;
        while !self.tasks.is_empty() {
            let step = tokio::select! {
                Some(control) = self.control_rx.recv() => Step::Control(control),
                joined = tokio::time::timeout(self.poll_interval, self.tasks.join_next_with_id()) => {
                    match joined {
                        Ok(joined) => Step::Joined(joined),
                        Err(_) => Step::Idle,
                    }
                }
            };
            match step {
                Step::Control(Control::Abort { reason }) => {
                    tracing::warn!("Aborting test: {}", reason);
                    aborted = Some(reason);
                    break;
                }
                Step::Joined(Some(joined)) => self.record(joined, reporter),
                Step::Joined(None) => break,
                Step::Idle => tracing::trace!(
                    running = self.tasks.len(),
                    live = self.registry.live_count(),
                    "Waiting for participants"
                ),
            }
        }

        let teardown = self.shutdown(reporter).await;
        Ok(RunReport {
            outcomes: std::mem::take(&mut self.outcomes),
            aborted,
            teardown,
        })
    }

    /// Turn one finished task into an outcome and report it
    fn record<R: Reporter>(&mut self, joined: Joined, reporter: &mut R) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, Ok(result)),
            Err(e) => (e.id(), Err(e)),
        };
        let (name, role) = self
            .task_names
            .remove(&id)
            .unwrap_or_else(|| ("<unknown>".to_string(), Role::Client));

        let result = match result {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled(name.clone())),
            Err(e) => Err(Error::TaskFailed {
                client: name.clone(),
                message: e.to_string(),
            }),
        };
        self.registry.set_phase(&name, registry::TaskPhase::Finished);

        match &result {
            Ok(out) => tracing::debug!(client = %name, exit_code = ?out.exit_code, "Finished"),
            Err(e) => tracing::debug!(client = %name, class = %e.class(), "Failed: {}", e),
        }
        let outcome = ClientOutcome { name, role, result };
        reporter.report(&outcome);
        self.outcomes.push(outcome);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testenv::Cascade;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn local_shell() -> Vec<String> {
        ["sh", "-c", "shift; exec \"$@\"", "rsh"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn plan(root: &Path, files: &[(&str, &str)]) -> TestPlan {
        for (name, content) in files {
            fs::write(root.join(name), content).unwrap();
        }
        TestPlan::load(&Cascade::new(root, root)).unwrap()
    }

    #[tokio::test]
    async fn test_every_participant_is_reported() {
        let dir = tempdir().unwrap();
        let plan = plan(
            dir.path(),
            &[
                ("test.env", "TEST_HOST=node1\n"),
                ("serverA.env", "TEST_LAUNCHER=\"echo serving\"\n"),
                ("clientB.env", "TEST_LAUNCHER=\"echo $CLIENT_NAME\"\n"),
                ("clientC.env", "TEST_HOST=\nTEST_LAUNCHER=\"echo never\"\n"),
            ],
        );

        let mut orch = Orchestrator::new(&Config::default(), local_shell());
        let mut seen = Vec::new();
        let report = orch
            .run_test(plan, &mut |o: &ClientOutcome| seen.push(o.name.clone()))
            .await
            .unwrap();

        seen.sort();
        assert_eq!(seen, ["clientB", "clientC", "serverA"]);
        assert_eq!(report.succeeded(), 2);
        assert!(report.aborted.is_none());
        assert!(report.teardown.is_clean());

        let b = report.outcomes.iter().find(|o| o.name == "clientB").unwrap();
        assert_eq!(b.result.as_ref().unwrap().output, "clientB\n");
        let c = report.outcomes.iter().find(|o| o.name == "clientC").unwrap();
        assert!(matches!(c.result, Err(Error::MissingHost { .. })));

        assert_eq!(orch.registry().process_count(), 0);
        assert_eq!(orch.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_abort_kills_and_cancels() {
        let dir = tempdir().unwrap();
        let plan = plan(
            dir.path(),
            &[
                ("test.env", "TEST_HOST=node1\n"),
                ("clientB.env", "TEST_LAUNCHER=\"sleep 30\"\n"),
                (
                    "clientD.env",
                    "TEST_LAUNCHER=\"echo late\"\nTEST_START_DELAY=30\n",
                ),
            ],
        );

        let mut orch = Orchestrator::new(&Config::default(), local_shell());
        let control = orch.control();
        let registry = orch.registry().clone();
        tokio::spawn(async move {
            while registry.live_count() == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            control.abort("operator");
        });

        let started = std::time::Instant::now();
        let report = orch
            .run_test(plan, &mut |_: &ClientOutcome| {})
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        assert_eq!(report.aborted.as_deref(), Some("operator"));
        assert_eq!(report.teardown.killed, ["clientB"]);
        assert_eq!(report.teardown.cancelled, ["clientD"]);
        assert_eq!(report.outcomes.len(), 2);
        let d = report.outcomes.iter().find(|o| o.name == "clientD").unwrap();
        assert!(matches!(d.result, Err(Error::Cancelled(_))));
        assert_eq!(orch.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let dir = tempdir().unwrap();
        let marker_dir = dir.path().join("node1");
        fs::create_dir(&marker_dir).unwrap();
        let witness = dir.path().join("kills");
        fs::write(
            marker_dir.join("ioc.killer"),
            format!("echo kill >> {}\n", witness.display()),
        )
        .unwrap();
        let plan = plan(
            dir.path(),
            &[("clientB.env", "TEST_HOST=node1\nTEST_LAUNCHER=\"-c true\"\n")],
        );

        let shell: Vec<String> = ["sh", "-c", "shift; exec sh \"$@\"", "rsh"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut orch = Orchestrator::new(&Config::default(), shell);
        let mut noop = |_: &ClientOutcome| {};
        let report = orch.run_test(plan, &mut noop).await.unwrap();
        assert_eq!(report.teardown.remote_kills, 1);

        let again = orch.shutdown(&mut noop).await;
        assert!(again.skipped);
        assert_eq!(again.remote_kills, 0);
        assert_eq!(fs::read_to_string(&witness).unwrap(), "kill\n");
    }

    #[tokio::test]
    async fn test_orchestrator_is_single_use() {
        let dir = tempdir().unwrap();
        let files = [("clientB.env", "TEST_HOST=h\nTEST_LAUNCHER=\"true\"\n")];
        let mut orch = Orchestrator::new(&Config::default(), local_shell());
        let mut noop = |_: &ClientOutcome| {};
        orch.run_test(plan(dir.path(), &files), &mut noop).await.unwrap();

        let err = orch
            .run_test(plan(dir.path(), &files), &mut noop)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
