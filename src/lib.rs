//! Orchestration core for isolated development cells: terminal sessions,
//! managed services, and the timed teardown workflow.

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod domains;
pub mod errors;
pub mod events;
pub mod infrastructure;

pub use errors::CellyardError;
