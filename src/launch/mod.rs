//! Remote process launching and output capture

pub mod output;
pub mod remote;

pub use remote::{LaunchOutput, RemoteLauncher};
