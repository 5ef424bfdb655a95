use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::CellyardError;

pub const CONFIG_ENV_VAR: &str = "CELLYARD_CONFIG";
const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: Option<PathBuf>,
    pub terminal: TerminalSettings,
    pub deletion: DeletionSettings,
    pub services: ServiceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub shell: Option<String>,
    pub output_buffer_chars: usize,
    pub cols: u16,
    pub rows: u16,
    pub agent_command: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: None,
            output_buffer_chars: pty_host::DEFAULT_OUTPUT_CAPACITY,
            cols: pty_host::DEFAULT_COLS,
            rows: pty_host::DEFAULT_ROWS,
            agent_command: vec!["claude".to_string()],
            env: BTreeMap::new(),
        }
    }
}

/// Per-step budgets of the deletion workflow, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionSettings {
    pub close_agent_session_ms: u64,
    pub close_terminal_sessions_ms: u64,
    pub stop_services_ms: u64,
    pub remove_workspace_ms: u64,
    pub delete_cell_record_ms: u64,
}

impl Default for DeletionSettings {
    fn default() -> Self {
        Self {
            close_agent_session_ms: 15_000,
            close_terminal_sessions_ms: 5_000,
            stop_services_ms: 30_000,
            remove_workspace_ms: 120_000,
            delete_cell_record_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub port_range_start: u16,
    pub port_range_end: u16,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            port_range_start: 39_100,
            port_range_end: 39_999,
        }
    }
}

impl Settings {
    /// Loads settings from `explicit`, `$CELLYARD_CONFIG`, or the user config
    /// dir, in that order. A missing file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = config_path(explicit) else {
            log::debug!("No config directory available; using default settings");
            return Ok(Self::default());
        };

        if !path.exists() {
            log::debug!("Config file {} not found; using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| CellyardError::config(&path.display().to_string(), e))?;
        let settings = Self::from_toml_str(&raw)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| CellyardError::config("toml", e.message()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.services.port_range_start > self.services.port_range_end {
            return Err(CellyardError::config(
                "services.port_range_start",
                format!(
                    "{} is above port_range_end {}",
                    self.services.port_range_start, self.services.port_range_end
                ),
            )
            .into());
        }
        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return Err(CellyardError::config("terminal", "cols and rows must be non-zero").into());
        }
        if self.terminal.agent_command.is_empty() {
            return Err(CellyardError::config("terminal.agent_command", "must not be empty").into());
        }
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.clone()
    }

    /// Configured shell, else `$SHELL`, else `/bin/sh`.
    pub fn effective_shell(&self) -> String {
        if let Some(shell) = self.terminal.shell.as_deref()
            && !shell.trim().is_empty()
        {
            return shell.to_string();
        }
        match std::env::var("SHELL") {
            Ok(shell) if !shell.trim().is_empty() => shell,
            _ => FALLBACK_SHELL.to_string(),
        }
    }
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("cellyard").join("config.toml"))
}
