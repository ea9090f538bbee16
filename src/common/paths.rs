//! Configuration paths and test directory layout
//!
//! Engine configuration uses the directories crate for platform-appropriate
//! locations. Everything else is laid out under the test root.

use std::path::{Path, PathBuf};

/// Name used for the configuration directory
const APP_NAME: &str = "stresstest";

/// Test-wide defaults file
pub const TEST_ENV: &str = "test.env";

/// Site-wide defaults file
pub const SITE_DEFAULT_ENV: &str = "siteDefault.env";

/// Engine defaults file in the script directory
pub const ENGINE_DEFAULT_ENV: &str = "stressTestDefault.env";

/// Snapshot of the resolved configuration
pub const TEST_CONFIG_JSON: &str = "testConfig.json";

/// Marker files used by watch mode
pub const START_MARKER: &str = "startTest";
pub const STOP_MARKER: &str = "stopTest";

/// Get the configuration directory path
///
/// - Linux: `~/.config/stresstest/`
/// - macOS: `~/Library/Application Support/stresstest/`
/// - Windows: `%APPDATA%\stresstest\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// `<appType>Default.env` in the script directory
pub fn app_type_default_env(script_dir: &Path, app_type: &str) -> PathBuf {
    script_dir.join(format!("{app_type}Default.env"))
}

/// `<clientName>.env` in the test root
pub fn client_env(test_root: &Path, client_name: &str) -> PathBuf {
    test_root.join(format!("{client_name}.env"))
}

/// Work-item list for one client instance:
/// `<testRoot>/<host>/clients/<clientName><NN>/pvs.list`
pub fn client_instance_list(
    test_root: &Path,
    host: &str,
    client_name: &str,
    instance: usize,
) -> PathBuf {
    test_root
        .join(host)
        .join("clients")
        .join(format!("{client_name}{instance:02}"))
        .join("pvs.list")
}

/// Test name is the last component of the test root
pub fn test_name(test_root: &Path) -> String {
    test_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
