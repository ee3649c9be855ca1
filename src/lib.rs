// ABOUTME: Library root for the MySQL backup archiver
// ABOUTME: Exposes each pipeline stage so the binary and integration tests share one implementation

pub mod config;
pub mod dump;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod preflight;
pub mod purge;
pub mod registry;
pub mod storage;
pub mod upload;
pub mod verify;

pub use config::{Config, JobSpec};
pub use error::ArchiverError;
pub use pipeline::{JobOutcome, JobReport, Pipeline, PurgeOutcome, Stage};
pub use registry::{ConnectionProfile, ConnectionRegistry};
