//! Resolved set of participants for one test run

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::{paths, Error, Result};

use super::client::{self, ClientSpec, Role};
use super::loader::Cascade;

/// A participant whose configuration could not be resolved
#[derive(Debug)]
pub struct Rejected {
    pub name: String,
    pub role: Role,
    pub error: Error,
}

/// Every participant of a test directory, resolved
#[derive(Debug, Serialize)]
pub struct TestPlan {
    pub test_top: PathBuf,
    pub test_name: String,
    pub servers: Vec<ClientSpec>,
    pub clients: Vec<ClientSpec>,
    #[serde(skip)]
    pub rejected: Vec<Rejected>,
}

impl TestPlan {
    /// Discover and resolve all participants under the cascade's test root
    ///
    /// A missing test root or one without participants is fatal. A single
    /// participant failing to resolve is recorded in `rejected`.
    pub fn load(cascade: &Cascade) -> Result<Self> {
        let test_root = cascade.test_root();
        if !test_root.is_dir() {
            return Err(Error::TestRootNotFound(test_root.to_path_buf()));
        }

        let participants = client::discover(test_root)?;
        if participants.is_empty() {
            return Err(Error::NoParticipants(test_root.to_path_buf()));
        }

        let mut plan = Self {
            test_top: test_root.to_path_buf(),
            test_name: paths::test_name(test_root),
            servers: Vec::new(),
            clients: Vec::new(),
            rejected: Vec::new(),
        };

        for (name, role) in participants {
            match ClientSpec::resolve(cascade, &name, role) {
                Ok(spec) => {
                    tracing::debug!(
                        client = %spec.name,
                        role = %spec.role,
                        host = spec.host.as_deref().unwrap_or("-"),
                        launcher = %spec.launcher,
                        "Resolved participant"
                    );
                    match role {
                        Role::Server => plan.servers.push(spec),
                        Role::Client => plan.clients.push(spec),
                    }
                }
                Err(error) => {
                    tracing::warn!(client = %name, "{}", error);
                    plan.rejected.push(Rejected { name, role, error });
                }
            }
        }

        Ok(plan)
    }

    pub fn test_root(&self) -> &Path {
        &self.test_top
    }

    /// Servers then clients, in submission order
    pub fn specs(&self) -> impl Iterator<Item = &ClientSpec> {
        self.servers.iter().chain(self.clients.iter())
    }

    pub fn find(&self, name: &str) -> Option<&ClientSpec> {
        self.specs().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.servers.len() + self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
