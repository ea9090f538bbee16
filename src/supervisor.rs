//! Watch mode
//!
//! Polls a test directory for a `startTest` marker. A fresh marker starts a
//! [`StressTestRun`], which runs the orchestrator for that directory until
//! its scheduled end (`TEST_DURATION` from `test.env`) or the time written
//! in a `stopTest` marker, whichever comes first.
//!
//! Both markers hold one `date` line, e.g. `Wed Oct 14 09:30:00 PDT 2026`.
//! The zone token is ignored and the time is taken as local.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta};
use tokio::task::JoinHandle;

use crate::common::config::Config;
use crate::common::{paths, Result};
use crate::orchestrator::{signals, Control, ControlHandle, Orchestrator, Reporter, RunReport};
use crate::testenv::{client, keys, loader, Cascade, TestPlan};

/// `date` output without its zone token
const MARKER_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// Parse one `date` line, dropping the zone token
pub fn parse_marker_time(line: &str) -> Option<NaiveDateTime> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    if words.len() != 6 {
        return None;
    }
    words.remove(4);
    NaiveDateTime::parse_from_str(&words.join(" "), MARKER_FORMAT).ok()
}

/// Time in the first non-blank line of a marker file
pub fn read_marker_time(path: &Path) -> Option<NaiveDateTime> {
    let content = std::fs::read_to_string(path).ok()?;
    let line = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    let time = parse_marker_time(line);
    if time.is_none() {
        tracing::debug!("Unparsable marker {}: {:?}", path.display(), line);
    }
    time
}

/// A start marker counts only within `window` of being written
pub fn is_fresh(marker: NaiveDateTime, now: NaiveDateTime, window: Duration) -> bool {
    match TimeDelta::from_std(window) {
        Ok(window) => now - marker <= window,
        Err(_) => true,
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// One watched test from its start marker to its stop condition
#[derive(Debug, Clone)]
pub struct StressTestRun {
    test_root: PathBuf,
    started: NaiveDateTime,
    duration: Option<TimeDelta>,
}

impl StressTestRun {
    /// Start tracking `test_root` at `started`, removing a stale `stopTest`
    pub fn start(test_root: &Path, started: NaiveDateTime) -> Self {
        let stop_marker = test_root.join(paths::STOP_MARKER);
        match std::fs::remove_file(&stop_marker) {
            Ok(()) => tracing::debug!("Removed stale {}", stop_marker.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Cannot remove {}: {}", stop_marker.display(), e),
        }

        let test_env = loader::read_file(&test_root.join(paths::TEST_ENV));
        let duration = match client::parse_seconds(
            &paths::test_name(test_root),
            keys::TEST_DURATION,
            &test_env,
        ) {
            Ok(secs) => secs
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .and_then(|d| TimeDelta::from_std(d).ok()),
            Err(e) => {
                tracing::warn!("{}; running until stopTest", e);
                None
            }
        };

        tracing::info!(
            test = %test_root.display(),
            duration = ?duration.map(|d| d.num_seconds()),
            "Start at {}",
            started.format("%c")
        );
        let run = Self {
            test_root: test_root.to_path_buf(),
            started,
            duration,
        };
        if duration.is_some() && run.scheduled_end().is_none() {
            tracing::warn!("{} out of range; running until stopTest", keys::TEST_DURATION);
        }
        run
    }

    pub fn test_root(&self) -> &Path {
        &self.test_root
    }

    /// Earlier of the scheduled end and the `stopTest` time, if either exists
    pub fn stop_time(&self) -> Option<NaiveDateTime> {
        let requested = read_marker_time(&self.test_root.join(paths::STOP_MARKER));
        let scheduled = self.scheduled_end();
        match (requested, scheduled) {
            (Some(r), Some(s)) => Some(r.min(s)),
            (r, s) => r.or(s),
        }
    }

    /// Start time plus `TEST_DURATION`; `None` past the end of the calendar
    fn scheduled_end(&self) -> Option<NaiveDateTime> {
        self.started.checked_add_signed(self.duration?)
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.stop_time().is_some_and(|stop| now > stop)
    }
}

/// A run and the orchestrator task driving it
struct ActiveRun {
    run: StressTestRun,
    control: ControlHandle,
    task: JoinHandle<Result<RunReport>>,
}

/// Watches one test directory for start and stop markers
pub struct Supervisor<R> {
    config: Config,
    shell: Vec<String>,
    test_root: PathBuf,
    reporter: R,
    active: Option<ActiveRun>,
    /// Cleared when a run fails or its teardown leaves kill failures
    clean: bool,
}

impl<R> Supervisor<R>
where
    R: Reporter + Clone + Send + 'static,
{
    /// `reporter` is cloned into every run
    pub fn new(config: Config, shell: Vec<String>, test_root: PathBuf, reporter: R) -> Self {
        Self {
            config,
            shell,
            test_root,
            reporter,
            active: None,
            clean: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Whether every run stopped so far tore down cleanly
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// Poll until a termination signal arrives, then stop any active run
    ///
    /// Returns whether every run tore down cleanly.
    pub async fn run(mut self) -> Result<bool> {
        let (handle, mut signals_rx) = ControlHandle::channel();
        let listener = signals::spawn_listener(handle)?;
        let tick = self.config.timeouts.supervisor_tick();
        tracing::info!("Watching {} for {}", self.test_root.display(), paths::START_MARKER);

        loop {
            tokio::select! {
                control = signals_rx.recv() => {
                    if let Some(Control::Abort { reason }) = control {
                        tracing::info!("Leaving watch mode: {}", reason);
                    }
                    break;
                }
                _ = tokio::time::sleep(tick) => {
                    let now = now();
                    self.check_start(now);
                    self.monitor(now).await;
                }
            }
        }

        self.stop("watch mode ended").await;
        listener.abort();
        tracing::info!(clean = self.clean, "Done");
        Ok(self.clean)
    }

    /// Start a run if a fresh `startTest` marker exists and none is active
    pub fn check_start(&mut self, now: NaiveDateTime) -> bool {
        if self.active.is_some() {
            return false;
        }
        let Some(marker) = read_marker_time(&self.test_root.join(paths::START_MARKER)) else {
            return false;
        };
        if !is_fresh(marker, now, self.config.timeouts.start_marker_fresh()) {
            tracing::trace!("Start marker from {} is stale", marker);
            return false;
        }

        let run = StressTestRun::start(&self.test_root, now);
        let plan = match TestPlan::load(&Cascade::from_config(&self.config, &self.test_root)) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!("Cannot start {}: {}", self.test_root.display(), e);
                return false;
            }
        };

        let mut orchestrator = Orchestrator::new(&self.config, self.shell.clone());
        let control = orchestrator.control();
        let mut reporter = self.reporter.clone();
        let task = tokio::spawn(async move { orchestrator.run_test(plan, &mut reporter).await });
        self.active = Some(ActiveRun { run, control, task });
        true
    }

    /// Stop the active run once it is due; forget it once it has finished
    pub async fn monitor(&mut self, now: NaiveDateTime) {
        let Some(active) = &self.active else {
            return;
        };
        tracing::trace!("Monitor: {}", active.run.test_root().display());
        if active.run.is_due(now) {
            self.stop("stop time reached").await;
        } else if active.task.is_finished() {
            self.stop("all participants finished").await;
        }
    }

    /// Abort the active run, if any, and wait for its teardown
    pub async fn stop(&mut self, reason: &str) -> Option<RunReport> {
        let active = self.active.take()?;
        tracing::info!("Stop: {} ({})", active.run.test_root().display(), reason);
        active.control.abort(reason);
        match active.task.await {
            Ok(Ok(report)) => {
                if !report.teardown.is_clean() {
                    tracing::warn!("{} kill attempts failed", report.teardown.failures);
                    self.clean = false;
                }
                Some(report)
            }
            Ok(Err(e)) => {
                tracing::error!("Run failed: {}", e);
                self.clean = false;
                None
            }
            Err(e) => {
                tracing::error!("Run task failed: {}", e);
                self.clean = false;
                None
            }
        }
    }
}
