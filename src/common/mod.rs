//! Common utilities shared by every mode

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorClass, Result};
