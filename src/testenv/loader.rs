//! `KEY=VALUE` file loading and the configuration cascade
//!
//! Each participant's configuration is merged from a fixed sequence of
//! `.env` files, later files overwriting earlier keys:
//!
//! 1. seeds: `SCRIPTDIR`, `TEST_TOP`, `TEST_NAME`, `CLIENT_NAME`
//! 2. engine defaults: built-in keys, then `$SCRIPTDIR/stressTestDefault.env`
//! 3. `<testRoot>/../siteDefault.env`, then `<testRoot>/siteDefault.env`
//! 4. `<testRoot>/test.env`
//! 5. `<testRoot>/<clientName>.env`
//! 6. `$SCRIPTDIR/<TEST_APPTYPE>Default.env` if step 5 set `TEST_APPTYPE`,
//!    followed by `<clientName>.env` again
//!
//! Finally every value is macro-expanded against the merged mapping.

use std::path::{Path, PathBuf};

use crate::common::config::Config;
use crate::common::paths;

use super::{keys, macros, ConfigMapping};

/// Parse one `KEY=VALUE`, `KEY='VALUE'` or `KEY="VALUE"` line
///
/// Returns `None` for blank lines, `#` comments and anything unparsable.
/// Quoted values may contain whitespace; bare values may not.
pub fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (name, value) = line.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return None;
    }

    let value = value.trim();
    let value = match value.as_bytes().first() {
        Some(&q @ (b'\'' | b'"')) => {
            let quote = q as char;
            let inner = value[1..].strip_suffix(quote)?;
            if inner.contains(quote) {
                return None;
            }
            inner
        }
        _ => {
            if value.chars().any(char::is_whitespace) {
                return None;
            }
            value
        }
    };

    Some((name.to_string(), value.to_string()))
}

/// Merge `KEY=VALUE` assignments from `path` into `mapping`
///
/// A missing or unreadable file contributes nothing. Returns whether the
/// file was read.
pub fn load_file(path: &Path, mapping: &mut ConfigMapping) -> bool {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::trace!(path = %path.display(), error = %e, "Skipping env file");
            return false;
        }
    };

    tracing::debug!(path = %path.display(), "Reading env file");
    for (name, value) in content.lines().filter_map(parse_line) {
        tracing::trace!("{} = {}", name, value);
        mapping.insert(name, value);
    }
    true
}

/// Read a single env file into a fresh mapping
pub fn read_file(path: &Path) -> ConfigMapping {
    let mut mapping = ConfigMapping::new();
    load_file(path, &mut mapping);
    mapping
}

/// Expand every value of `mapping` against the mapping itself
pub fn expand_values(mapping: &mut ConfigMapping) {
    let snapshot = mapping.clone();
    for value in mapping.values_mut() {
        *value = macros::expand(value, &snapshot);
    }
}

/// Fixed inputs of the cascade shared by every participant of one test
#[derive(Debug, Clone)]
pub struct Cascade {
    script_dir: PathBuf,
    test_root: PathBuf,
    engine_defaults: ConfigMapping,
}

impl Cascade {
    pub fn new(script_dir: impl Into<PathBuf>, test_root: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
            test_root: test_root.into(),
            engine_defaults: ConfigMapping::new(),
        }
    }

    /// Cascade for `test_root` with the engine's script dir and default launcher
    pub fn from_config(config: &Config, test_root: impl Into<PathBuf>) -> Self {
        Self::new(config.script_dir(), test_root)
            .with_default(keys::TEST_LAUNCHER, &config.engine.default_launcher)
    }

    /// Add a built-in engine default, applied before `stressTestDefault.env`
    pub fn with_default(mut self, key: &str, value: &str) -> Self {
        self.engine_defaults.insert(key.to_string(), value.to_string());
        self
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn test_root(&self) -> &Path {
        &self.test_root
    }

    /// Files read for `client_name` in precedence order, lowest first
    ///
    /// The app-type file depends on the merged `TEST_APPTYPE`, so it is
    /// listed only when `app_type` is given.
    pub fn sources(&self, client_name: &str, app_type: Option<&str>) -> Vec<PathBuf> {
        let client_file = paths::client_env(&self.test_root, client_name);
        let mut sources = vec![
            self.script_dir.join(paths::ENGINE_DEFAULT_ENV),
            self.test_root.join("..").join(paths::SITE_DEFAULT_ENV),
            self.test_root.join(paths::SITE_DEFAULT_ENV),
            self.test_root.join(paths::TEST_ENV),
            client_file.clone(),
        ];
        if let Some(app_type) = app_type {
            sources.push(paths::app_type_default_env(&self.script_dir, app_type));
            sources.push(client_file);
        }
        sources
    }

    /// Build the fully expanded mapping for one participant
    pub fn resolve(&self, client_name: &str) -> ConfigMapping {
        let mut mapping = ConfigMapping::new();
        mapping.insert(
            keys::SCRIPTDIR.to_string(),
            self.script_dir.display().to_string(),
        );
        mapping.insert(
            keys::TEST_TOP.to_string(),
            self.test_root.display().to_string(),
        );
        mapping.insert(keys::TEST_NAME.to_string(), paths::test_name(&self.test_root));
        mapping.insert(keys::CLIENT_NAME.to_string(), client_name.to_string());
        mapping.extend(self.engine_defaults.clone());

        for path in self.sources(client_name, None) {
            load_file(&path, &mut mapping);
        }

        if let Some(app_type) = mapping.get(keys::TEST_APPTYPE).cloned() {
            let sources = self.sources(client_name, Some(&app_type));
            for path in &sources[sources.len() - 2..] {
                load_file(path, &mut mapping);
            }
        }

        expand_values(&mut mapping);
        mapping
    }
}
