pub mod hub;
pub mod ids;
pub mod shell;

use async_trait::async_trait;

pub use hub::TerminalHub;
pub use ids::{CellId, ServiceId};

/// Interactive sessions tied to a cell, as needed by cell teardown.
#[async_trait]
pub trait CellTerminals: Send + Sync {
    /// Closes every terminal the cell owns and returns how many were live.
    async fn close_cell_sessions(&self, cell_id: &str) -> anyhow::Result<usize>;
}
