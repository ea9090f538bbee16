//! Participant discovery and launch specification

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::common::{paths, Error, Result};

use super::{keys, loader::Cascade, ConfigMapping};

/// Whether a participant serves or consumes test traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Participants whose file stem contains `Server` are servers
    pub fn from_name(name: &str) -> Self {
        if name.contains("Server") {
            Role::Server
        } else {
            Role::Client
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Fully resolved launch description for one participant
#[derive(Debug, Clone, Serialize)]
pub struct ClientSpec {
    pub name: String,
    pub role: Role,
    /// `TEST_APPTYPE`, selects `<appType>Default.env`
    pub app_type: Option<String>,
    /// `TEST_HOST`; checked at launch time
    pub host: Option<String>,
    /// `TEST_LAUNCHER` command template
    pub launcher: String,
    /// `TEST_START_DELAY` in seconds
    pub start_delay_secs: Option<f64>,
    /// `TEST_DURATION` in seconds
    pub duration_secs: Option<f64>,
    /// The merged mapping the spec was resolved from
    pub env: ConfigMapping,
}

impl ClientSpec {
    /// Resolve a participant through the cascade
    pub fn resolve(cascade: &Cascade, name: &str, role: Role) -> Result<Self> {
        Self::from_mapping(name, role, cascade.resolve(name))
    }

    /// Build a spec from an already merged and expanded mapping
    pub fn from_mapping(name: &str, role: Role, env: ConfigMapping) -> Result<Self> {
        let start_delay_secs = parse_seconds(name, keys::TEST_START_DELAY, &env)?;
        let duration_secs = parse_seconds(name, keys::TEST_DURATION, &env)?;

        Ok(Self {
            name: name.to_string(),
            role,
            app_type: non_empty(&env, keys::TEST_APPTYPE),
            host: non_empty(&env, keys::TEST_HOST),
            launcher: env.get(keys::TEST_LAUNCHER).cloned().unwrap_or_default(),
            start_delay_secs,
            duration_secs,
            env,
        })
    }

    pub fn start_delay(&self) -> Option<Duration> {
        self.start_delay_secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Integer field from the resolved mapping, `None` when absent or empty
    pub fn count(&self, key: &str) -> Result<Option<usize>> {
        match self.env.get(key).map(|v| v.trim()) {
            None | Some("") => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| Error::invalid_number(&self.name, key, v)),
        }
    }
}

fn non_empty(env: &ConfigMapping, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse an optional non-negative seconds value; empty counts as absent
///
/// The value must fit a [`Duration`].
pub fn parse_seconds(client: &str, key: &str, env: &ConfigMapping) -> Result<Option<f64>> {
    let Some(raw) = env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(secs) if Duration::try_from_secs_f64(secs).is_ok() => Ok(Some(secs)),
        _ => Err(Error::invalid_number(client, key, raw)),
    }
}

/// Find participants: every `*.env` directly under `test_root` except the
/// shared defaults files. Sorted by name, servers first.
pub fn discover(test_root: &Path) -> Result<Vec<(String, Role)>> {
    let entries = std::fs::read_dir(test_root).map_err(|e| Error::FileRead {
        path: test_root.display().to_string(),
        error: e.to_string(),
    })?;

    let mut participants = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("env") {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == paths::TEST_ENV || file_name == paths::SITE_DEFAULT_ENV {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        participants.push((stem.to_string(), Role::from_name(stem)));
    }

    participants.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
    Ok(participants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> ConfigMapping {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_role_from_name() {
        assert_eq!(Role::from_name("gwServerA"), Role::Server);
        assert_eq!(Role::from_name("pvGetClient"), Role::Client);
        assert_eq!(Role::from_name("server"), Role::Client);
    }

    #[test]
    fn test_from_mapping() {
        let spec = ClientSpec::from_mapping(
            "clientB",
            Role::Client,
            env(&[
                ("TEST_HOST", "node3"),
                ("TEST_LAUNCHER", "run.sh clientB"),
                ("TEST_START_DELAY", "1.5"),
                ("TEST_DURATION", ""),
                ("TEST_APPTYPE", "pvGet"),
            ]),
        )
        .unwrap();
        assert_eq!(spec.host.as_deref(), Some("node3"));
        assert_eq!(spec.start_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(spec.duration(), None);
        assert_eq!(spec.app_type.as_deref(), Some("pvGet"));
    }

    #[test]
    fn test_blank_host_is_absent() {
        let spec =
            ClientSpec::from_mapping("c", Role::Client, env(&[("TEST_HOST", "  ")])).unwrap();
        assert!(spec.host.is_none());
        assert!(spec.launcher.is_empty());
    }

    #[test]
    fn test_malformed_numbers_are_rejected() {
        for bad in ["soon", "-1", "inf", "NaN", "1e20"] {
            let err = ClientSpec::from_mapping("c", Role::Client, env(&[("TEST_DURATION", bad)]))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidNumber { .. }), "{bad}");
        }
    }

    #[test]
    fn test_count() {
        let spec = ClientSpec::from_mapping(
            "c",
            Role::Client,
            env(&[("TEST_N_CLIENTS", "3"), ("TEST_N_SERVERS", "x")]),
        )
        .unwrap();
        assert_eq!(spec.count(keys::TEST_N_CLIENTS).unwrap(), Some(3));
        assert_eq!(spec.count(keys::TEST_N_COUNTERS).unwrap(), None);
        assert!(spec.count(keys::TEST_N_SERVERS).is_err());
    }

    #[test]
    fn test_discover_sorts_servers_first() {
        let dir = tempdir().unwrap();
        for name in [
            "test.env",
            "siteDefault.env",
            "zClient.env",
            "aClient.env",
            "bServer.env",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("dir.env")).unwrap();

        let found = discover(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                ("bServer".to_string(), Role::Server),
                ("aClient".to_string(), Role::Client),
                ("zClient".to_string(), Role::Client),
            ]
        );
    }
}
