//! Incident orchestration: turns alert-group notifications into enriched
//! incidents and forwards them to a ticketing backend.

pub mod config;
pub mod correlation;
pub mod enrichment;
pub mod error;
pub mod identity;
pub mod model;
pub mod orchestrator;
pub mod retrieval;
pub mod telemetry;
pub mod ticket;

#[cfg(test)]
mod test_server;

pub use config::Settings;
pub use error::{BuildError, PipelineError};
pub use model::{Incident, Note};
pub use orchestrator::Orchestrator;
