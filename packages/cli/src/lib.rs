//! Labrun CLI support: job files and process-wide setup shared by the
//! `labrun` binary.

pub mod job_file;
pub mod telemetry;

pub use job_file::{load_job_file, parse_job, JobFile};
pub use telemetry::init_tracing;
