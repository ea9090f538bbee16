//! Engine configuration file handling
//!
//! This is the manager's own configuration (remote shell, timeouts, log file).
//! Per-test configuration lives in `.env` files, see [`crate::testenv`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Environment variable naming the script directory
pub const SCRIPT_DIR_ENV: &str = "STRESSTEST_SCRIPTDIR";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine settings
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Directory holding `stressTestDefault.env`, `<appType>Default.env`
    /// and the launch scripts
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Command prefix used to reach a remote host; the host name and the
    /// launcher words are appended to it
    #[serde(default = "default_remote_shell")]
    pub remote_shell: Vec<String>,

    /// Launcher template used when a participant sets no `TEST_LAUNCHER`
    #[serde(default = "default_launcher")]
    pub default_launcher: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            remote_shell: default_remote_shell(),
            default_launcher: default_launcher(),
        }
    }
}

fn default_remote_shell() -> Vec<String> {
    vec!["ssh".to_string(), "-t".to_string(), "-t".to_string()]
}

fn default_launcher() -> String {
    "$SCRIPTDIR/launch_client.sh $TEST_TOP $CLIENT_NAME".to_string()
}

/// Timeout settings, milliseconds unless named `_secs`
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long the orchestrator waits per completion poll
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-attempt wait while draining a remote session's output
    #[serde(default = "default_drain_poll")]
    pub drain_poll_ms: u64,

    /// Watch mode polling period
    #[serde(default = "default_supervisor_tick")]
    pub supervisor_tick_ms: u64,

    /// A `startTest` marker older than this is ignored
    #[serde(default = "default_start_marker_fresh")]
    pub start_marker_fresh_secs: u64,

    /// Bound on running one remote kill marker
    #[serde(default = "default_remote_kill")]
    pub remote_kill_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            drain_poll_ms: default_drain_poll(),
            supervisor_tick_ms: default_supervisor_tick(),
            start_marker_fresh_secs: default_start_marker_fresh(),
            remote_kill_secs: default_remote_kill(),
        }
    }
}

fn default_poll_interval() -> u64 {
    100
}
fn default_drain_poll() -> u64 {
    1000
}
fn default_supervisor_tick() -> u64 {
    1000
}
fn default_start_marker_fresh() -> u64 {
    2
}
fn default_remote_kill() -> u64 {
    30
}

impl Timeouts {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }

    pub fn supervisor_tick(&self) -> Duration {
        Duration::from_millis(self.supervisor_tick_ms.max(1))
    }

    pub fn remote_kill(&self) -> Duration {
        Duration::from_secs(self.remote_kill_secs)
    }

    pub fn start_marker_fresh(&self) -> Duration {
        Duration::from_secs(self.start_marker_fresh_secs)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Append detailed logs to this file in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path`, or from the default config file
    ///
    /// Returns default configuration if the default file doesn't exist.
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Resolve the script directory
    ///
    /// Order: config file, `STRESSTEST_SCRIPTDIR`, directory of the running
    /// executable, current directory.
    pub fn script_dir(&self) -> PathBuf {
        if let Some(dir) = &self.engine.script_dir {
            return dir.clone();
        }
        if let Ok(dir) = std::env::var(SCRIPT_DIR_ENV) {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve the remote shell command, looking its program up in PATH
    pub fn remote_shell(&self) -> Result<Vec<String>> {
        let (program, rest) = self
            .engine
            .remote_shell
            .split_first()
            .ok_or_else(|| super::Error::Config("remote_shell is empty".to_string()))?;

        let resolved = if Path::new(program).is_absolute() {
            PathBuf::from(program)
        } else {
            which::which(program)
                .map_err(|_| super::Error::RemoteShellNotFound(program.clone()))?
        };

        let mut shell = vec![resolved.to_string_lossy().into_owned()];
        shell.extend(rest.iter().cloned());
        Ok(shell)
    }
}
