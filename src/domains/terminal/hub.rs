use async_trait::async_trait;
use pty_host::{
    EnsureOptions, LaunchCommand, ProcessSpawner, RegistryConfig, SessionRegistry,
    TerminalSession,
};
use std::path::Path;
use std::sync::Arc;

use super::CellTerminals;
use super::ids::{CellId, ServiceId};
use super::shell::login_script;
use crate::config::TerminalSettings;
use crate::errors::CellyardError;

/// The independent terminal registries of the application: interactive
/// shells, agent chats and setup scripts per cell, plus service processes.
#[derive(Clone)]
pub struct TerminalHub {
    shell: SessionRegistry<CellId>,
    chat: SessionRegistry<CellId>,
    setup: SessionRegistry<CellId>,
    services: SessionRegistry<ServiceId>,
    shell_program: String,
    env: Vec<(String, String)>,
}

impl TerminalHub {
    pub fn new(settings: &TerminalSettings, shell: String, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let env: Vec<(String, String)> = settings
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let with_env = |command: LaunchCommand| {
            env.iter()
                .fold(command, |cmd, (k, v)| cmd.env(k.clone(), v.clone()))
        };

        let config = |label: &str, launch: LaunchCommand| {
            RegistryConfig::new(label, with_env(launch))
                .with_buffer_capacity(settings.output_buffer_chars)
                .with_size(settings.cols, settings.rows)
        };

        let agent = match settings.agent_command.split_first() {
            Some((program, args)) => LaunchCommand::new(program.clone()).args(args.iter().cloned()),
            None => LaunchCommand::new(shell.clone()),
        };

        let shell_config = config("shell", LaunchCommand::new(shell.clone()));
        let chat_config = config("chat", agent);
        let setup_config = config("setup", LaunchCommand::new(shell.clone()));
        let service_config = config("service", LaunchCommand::new(shell.clone()));

        Self {
            shell: SessionRegistry::new(shell_config, spawner.clone()),
            chat: SessionRegistry::new(chat_config, spawner.clone()),
            setup: SessionRegistry::new(setup_config, spawner.clone()),
            services: SessionRegistry::new(service_config, spawner),
            shell_program: shell,
            env,
        }
    }

    pub fn shell(&self) -> &SessionRegistry<CellId> {
        &self.shell
    }

    pub fn chat(&self) -> &SessionRegistry<CellId> {
        &self.chat
    }

    pub fn setup(&self) -> &SessionRegistry<CellId> {
        &self.setup
    }

    pub fn services(&self) -> &SessionRegistry<ServiceId> {
        &self.services
    }

    pub fn shell_program(&self) -> &str {
        &self.shell_program
    }

    /// `script` run through the login shell, with the configured environment.
    pub fn script_command(&self, script: &str) -> LaunchCommand {
        self.env.iter().fold(
            login_script(&self.shell_program, script),
            |cmd, (k, v)| cmd.env(k.clone(), v.clone()),
        )
    }

    pub async fn ensure_shell(&self, cell: &CellId, cwd: &Path) -> Result<TerminalSession, CellyardError> {
        Ok(self.shell.ensure_session(cell, cwd).await?)
    }

    pub async fn ensure_chat(&self, cell: &CellId, cwd: &Path) -> Result<TerminalSession, CellyardError> {
        Ok(self.chat.ensure_session(cell, cwd).await?)
    }

    /// Starts (or restarts) the cell's setup script. A retry keeps the
    /// session id and the output of earlier attempts.
    pub async fn run_setup(
        &self,
        cell: &CellId,
        cwd: &Path,
        script: &str,
    ) -> Result<TerminalSession, CellyardError> {
        let options = EnsureOptions::with_command(self.script_command(script)).preserving_history();
        let session = self.setup.attach_process(cell, cwd, options).await?;
        log::info!("Running setup for cell {cell} (session {})", session.session_id);
        Ok(session)
    }

    pub async fn close_cell_terminals(&self, cell: &CellId) -> usize {
        let mut closed = 0;
        for registry in [&self.shell, &self.chat, &self.setup] {
            if registry.close_session(cell).await {
                closed += 1;
            }
        }
        closed
    }

    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for registry in [&self.shell, &self.chat, &self.setup] {
            stopped += registry.stop_all().await;
        }
        stopped + self.services.stop_all().await
    }

    /// Synchronous teardown for shutdown paths.
    pub fn kill_all(&self) -> usize {
        let killed = self.shell.kill_all()
            + self.chat.kill_all()
            + self.setup.kill_all()
            + self.services.kill_all();
        if killed > 0 {
            log::info!("Killed {killed} terminal processes");
        }
        killed
    }
}

#[async_trait]
impl CellTerminals for TerminalHub {
    async fn close_cell_sessions(&self, cell_id: &str) -> anyhow::Result<usize> {
        Ok(self.close_cell_terminals(&CellId::new(cell_id)).await)
    }
}
