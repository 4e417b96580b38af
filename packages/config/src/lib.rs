//! Labrun Config - environment variable names and parsing helpers shared by
//! every labrun crate.

pub mod constants;
pub mod env;

pub use env::{env_millis, env_or, env_path_or, env_secs, env_string, env_validated};
