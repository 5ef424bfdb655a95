use anyhow::Result;
use async_trait::async_trait;

use crate::domains::terminal::{CellId, TerminalHub};

/// Connection to whatever runs the coding agent inside a cell.
#[async_trait]
pub trait AgentSessionClient: Send + Sync {
    async fn close_session(&self, cell_id: &str) -> Result<()>;
}

/// Used when no agent provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAgentSessions;

#[async_trait]
impl AgentSessionClient for NoopAgentSessions {
    async fn close_session(&self, cell_id: &str) -> Result<()> {
        log::debug!("No agent provider configured; nothing to close for cell {cell_id}");
        Ok(())
    }
}

/// Agent running as the cell's chat terminal.
#[derive(Clone)]
pub struct ChatAgentSessions {
    hub: TerminalHub,
}

impl ChatAgentSessions {
    pub fn new(hub: TerminalHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl AgentSessionClient for ChatAgentSessions {
    async fn close_session(&self, cell_id: &str) -> Result<()> {
        let cell = CellId::new(cell_id);
        if self.hub.chat().close_session(&cell).await {
            log::info!("Closed agent chat for cell {cell_id}");
        }
        Ok(())
    }
}
