pub mod aggregation;
pub mod entity;
pub mod recorder;
pub mod store;

pub use aggregation::{TimingReport, build_timing_runs, parse_timing_step, query_timings};
pub use entity::{
    TimingEventRow, TimingFilter, TimingRunRecord, TimingStatus, TimingStepRecord, TimingWorkflow,
};
pub use recorder::TimingRecorder;
pub use store::TimingStore;
