use log::info;

use crate::domains::terminal::TerminalHub;

/// Kills every terminal process still tracked by the hub. Synchronous so it
/// can run from `Drop` during unwinding.
pub fn cleanup_all_terminals(hub: &TerminalHub) -> usize {
    info!("Terminal cleanup on shutdown");
    let killed = hub.kill_all();
    info!("Terminal cleanup complete ({killed} killed)");
    killed
}

/// Ensure cleanup happens even on panic
pub struct TerminalCleanupGuard {
    hub: TerminalHub,
}

impl TerminalCleanupGuard {
    pub fn new(hub: TerminalHub) -> Self {
        Self { hub }
    }
}

impl Drop for TerminalCleanupGuard {
    fn drop(&mut self) {
        cleanup_all_terminals(&self.hub);
    }
}
