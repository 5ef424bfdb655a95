use anyhow::Result;
use async_trait::async_trait;

use super::entity::{Cell, CellStatus};
use crate::infrastructure::database::{CellMethods, Database};

/// Persisted cell records as seen by the lifecycle workflows.
#[async_trait]
pub trait CellStore: Send + Sync {
    async fn get_cell(&self, cell_id: &str) -> Result<Option<Cell>>;
    async fn update_cell_status(&self, cell_id: &str, status: CellStatus) -> Result<()>;
    async fn delete_cell(&self, cell_id: &str) -> Result<()>;
    async fn record_setup_error(&self, cell_id: &str, message: Option<&str>) -> Result<()>;
}

#[async_trait]
impl CellStore for Database {
    async fn get_cell(&self, cell_id: &str) -> Result<Option<Cell>> {
        let cell_id = cell_id.to_string();
        self.run_blocking(move |db| db.find_cell(&cell_id)).await
    }

    async fn update_cell_status(&self, cell_id: &str, status: CellStatus) -> Result<()> {
        let cell_id = cell_id.to_string();
        self.run_blocking(move |db| db.set_cell_status(&cell_id, status))
            .await
    }

    async fn delete_cell(&self, cell_id: &str) -> Result<()> {
        let cell_id = cell_id.to_string();
        self.run_blocking(move |db| db.remove_cell(&cell_id)).await
    }

    async fn record_setup_error(&self, cell_id: &str, message: Option<&str>) -> Result<()> {
        let cell_id = cell_id.to_string();
        let message = message.map(str::to_string);
        self.run_blocking(move |db| db.set_cell_setup_error(&cell_id, message.as_deref()))
            .await
    }
}
