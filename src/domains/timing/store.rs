use anyhow::Result;
use async_trait::async_trait;

use super::entity::{TimingEventRow, TimingFilter, TimingStepRecord};
use crate::infrastructure::database::{Database, TimingMethods};

/// Append-only log of workflow step outcomes.
#[async_trait]
pub trait TimingStore: Send + Sync {
    async fn insert_timing_event(&self, record: &TimingStepRecord) -> Result<()>;
    async fn list_timing_events(&self, filter: &TimingFilter) -> Result<Vec<TimingEventRow>>;
}

#[async_trait]
impl TimingStore for Database {
    async fn insert_timing_event(&self, record: &TimingStepRecord) -> Result<()> {
        let record = record.clone();
        self.run_blocking(move |db| db.insert_timing_row(&record)).await
    }

    async fn list_timing_events(&self, filter: &TimingFilter) -> Result<Vec<TimingEventRow>> {
        let filter = filter.clone();
        self.run_blocking(move |db| db.list_timing_rows(&filter)).await
    }
}
