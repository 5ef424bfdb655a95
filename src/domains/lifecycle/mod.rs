//! Multi-step cell workflows: teardown and setup, each step bounded by a
//! timeout and recorded in the timing log.

pub mod deletion;
pub mod setup;
pub mod steps;
pub mod timeout;

pub use deletion::{CellDeletionLifecycle, DeletionCollaborators, DeletionReport, DeletionTimeouts};
pub use setup::{CellSetupLifecycle, SetupOutcome};
pub use steps::{LifecycleStep, StepMetadata, StepOutcome, StepRunner};
pub use timeout::{is_timeout, run_with_timeout};
