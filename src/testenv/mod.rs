//! Test directory configuration
//!
//! A test directory holds one `<name>.env` file per participant plus shared
//! defaults. This module merges those files into a [`ConfigMapping`] per
//! participant and resolves each into a [`ClientSpec`].

pub mod client;
pub mod loader;
pub mod macros;
pub mod plan;

use std::collections::BTreeMap;

/// Merged `KEY=VALUE` configuration for one participant
pub type ConfigMapping = BTreeMap<String, String>;

pub use client::{ClientSpec, Role};
pub use loader::Cascade;
pub use plan::{Rejected, TestPlan};

/// Well-known configuration keys
pub mod keys {
    pub const SCRIPTDIR: &str = "SCRIPTDIR";
    pub const TEST_TOP: &str = "TEST_TOP";
    pub const TEST_NAME: &str = "TEST_NAME";
    pub const CLIENT_NAME: &str = "CLIENT_NAME";

    pub const TEST_HOST: &str = "TEST_HOST";
    pub const TEST_LAUNCHER: &str = "TEST_LAUNCHER";
    pub const TEST_APPTYPE: &str = "TEST_APPTYPE";
    pub const TEST_START_DELAY: &str = "TEST_START_DELAY";
    pub const TEST_DURATION: &str = "TEST_DURATION";

    pub const TEST_N_CLIENTS: &str = "TEST_N_CLIENTS";
    pub const TEST_N_SERVERS: &str = "TEST_N_SERVERS";
    pub const TEST_N_COUNTERS: &str = "TEST_N_COUNTERS";
    pub const TEST_PV_PREFIX: &str = "TEST_PV_PREFIX";
}
