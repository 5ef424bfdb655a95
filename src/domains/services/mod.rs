//! Service processes (dev servers, watchers) started for a cell.
//!
//! Each service runs in the service terminal registry and holds a port
//! reserved from the configured range until it is stopped.

pub mod ports;

use anyhow::Result;
use async_trait::async_trait;
use pty_host::EnsureOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::config::ServiceSettings;
use crate::domains::terminal::{ServiceId, TerminalHub};
use crate::errors::CellyardError;
pub use ports::PortRegistry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedService {
    pub id: ServiceId,
    pub cell_id: String,
    /// Display name (e.g., "web", "api")
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub port: u16,
    pub url: String,
    pub pid: Option<u32>,
    pub session_id: String,
    /// Unix timestamp (seconds) when the service was started
    pub started_at: u64,
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStopReport {
    pub stopped: Vec<String>,
    pub released_ports: Vec<u16>,
}

/// Stops everything a cell is running; consumed by cell teardown.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    async fn stop_cell_services(&self, cell_id: &str) -> Result<ServiceStopReport>;
}

struct ServiceState {
    services: HashMap<ServiceId, ManagedService>,
    ports: PortRegistry,
}

#[derive(Clone)]
pub struct ServiceManager {
    hub: TerminalHub,
    state: Arc<RwLock<ServiceState>>,
}

impl ServiceManager {
    pub fn new(hub: TerminalHub, settings: &ServiceSettings) -> Self {
        Self {
            hub,
            state: Arc::new(RwLock::new(ServiceState {
                services: HashMap::new(),
                ports: PortRegistry::new(settings.port_range_start..=settings.port_range_end),
            })),
        }
    }

    /// Reserves a port (exported as `PORT`) and launches `command` for the cell.
    pub async fn start_service(
        &self,
        cell_id: &str,
        name: &str,
        command: &str,
        cwd: &Path,
        preferred_port: Option<u16>,
    ) -> Result<ManagedService> {
        if name.trim().is_empty() {
            return Err(CellyardError::invalid_input("name", "service name is empty").into());
        }
        if command.trim().is_empty() {
            return Err(CellyardError::invalid_input("command", "service command is empty").into());
        }

        let port = self.state.write().await.ports.reserve(preferred_port)?;
        let id = ServiceId::generate(port);
        let launch = self.hub.script_command(command).env("PORT", port.to_string());

        let session = match self
            .hub
            .services()
            .ensure_session_with(&id, cwd, EnsureOptions::with_command(launch))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.state.write().await.ports.release(port);
                return Err(CellyardError::from(e).into());
            }
        };

        let service = ManagedService {
            id: id.clone(),
            cell_id: cell_id.to_string(),
            name: name.to_string(),
            command: command.to_string(),
            cwd: cwd.to_path_buf(),
            port,
            url: format!("http://localhost:{port}"),
            pid: session.pid,
            session_id: session.session_id,
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs(),
            status: ServiceStatus::Running,
        };

        self.state
            .write()
            .await
            .services
            .insert(id, service.clone());

        log::info!(
            "Started service {} for cell {cell_id} on port {port} (id: {})",
            service.name,
            service.id
        );
        Ok(service)
    }

    pub async fn stop_service(&self, id: &ServiceId) -> Result<ManagedService> {
        let mut service = {
            let mut state = self.state.write().await;
            let service = state
                .services
                .remove(id)
                .ok_or_else(|| CellyardError::ServiceNotFound {
                    service_id: id.to_string(),
                })?;
            state.ports.release(service.port);
            service
        };

        self.hub.services().close_session(id).await;
        service.status = ServiceStatus::Stopped;
        log::info!("Stopped service {} (id: {})", service.name, service.id);
        Ok(service)
    }

    pub async fn stop_cell_services(&self, cell_id: &str) -> ServiceStopReport {
        let removed: Vec<ManagedService> = {
            let mut state = self.state.write().await;
            let ids: Vec<ServiceId> = state
                .services
                .values()
                .filter(|svc| svc.cell_id == cell_id)
                .map(|svc| svc.id.clone())
                .collect();
            let removed: Vec<ManagedService> = ids
                .iter()
                .filter_map(|id| state.services.remove(id))
                .collect();
            for svc in &removed {
                state.ports.release(svc.port);
            }
            removed
        };

        let mut report = ServiceStopReport::default();
        for svc in removed {
            self.hub.services().close_session(&svc.id).await;
            report.stopped.push(svc.id.to_string());
            report.released_ports.push(svc.port);
        }

        if !report.stopped.is_empty() {
            log::info!(
                "Stopped {} services for cell {cell_id}, released ports {:?}",
                report.stopped.len(),
                report.released_ports
            );
        }
        report
    }

    pub async fn get(&self, id: &ServiceId) -> Option<ManagedService> {
        self.state.read().await.services.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ManagedService> {
        self.state.read().await.services.values().cloned().collect()
    }

    pub async fn list_by_cell(&self, cell_id: &str) -> Vec<ManagedService> {
        let mut services: Vec<ManagedService> = self
            .state
            .read()
            .await
            .services
            .values()
            .filter(|svc| svc.cell_id == cell_id)
            .cloned()
            .collect();
        services.sort_by_key(|svc| svc.port);
        services
    }

    pub async fn is_port_reserved(&self, port: u16) -> bool {
        self.state.read().await.ports.is_reserved(port)
    }
}

#[async_trait]
impl ServiceSupervisor for ServiceManager {
    async fn stop_cell_services(&self, cell_id: &str) -> Result<ServiceStopReport> {
        Ok(ServiceManager::stop_cell_services(self, cell_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalSettings;
    use pty_host::testing::FakeSpawner;

    fn manager(spawner: &FakeSpawner, start: u16, end: u16) -> ServiceManager {
        let hub = TerminalHub::new(
            &TerminalSettings::default(),
            "/bin/sh".into(),
            Arc::new(spawner.clone()),
        );
        ServiceManager::new(
            hub,
            &ServiceSettings {
                port_range_start: start,
                port_range_end: end,
            },
        )
    }

    #[tokio::test]
    async fn start_exports_port_and_tracks_service() {
        let spawner = FakeSpawner::new();
        let services = manager(&spawner, 4000, 4010);

        let web = services
            .start_service("cell-1", "web", "npm run dev", Path::new("/tmp"), None)
            .await
            .unwrap();
        assert_eq!(web.port, 4000);
        assert_eq!(web.url, "http://localhost:4000");
        assert_eq!(web.status, ServiceStatus::Running);

        let request = spawner.last_process().unwrap().request().clone();
        assert_eq!(request.command.args, vec!["-lc", "npm run dev"]);
        assert!(request.command.env.contains(&("PORT".into(), "4000".into())));

        let api = services
            .start_service("cell-1", "api", "cargo run", Path::new("/tmp"), Some(4005))
            .await
            .unwrap();
        assert_eq!(api.port, 4005);

        let err = services
            .start_service("cell-2", "dup", "true", Path::new("/tmp"), Some(4005))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CellyardError>(),
            Some(&CellyardError::PortUnavailable { port: 4005 })
        );

        let listed = services.list_by_cell("cell-1").await;
        assert_eq!(listed.iter().map(|s| s.port).collect::<Vec<_>>(), vec![4000, 4005]);
        assert_eq!(services.get(&web.id).await.unwrap().name, "web");
    }

    #[tokio::test]
    async fn stop_cell_services_releases_ports_once() {
        let spawner = FakeSpawner::new();
        let services = manager(&spawner, 4000, 4010);

        let a = services
            .start_service("cell-1", "web", "npm run dev", Path::new("/tmp"), None)
            .await
            .unwrap();
        let b = services
            .start_service("cell-1", "api", "npm run api", Path::new("/tmp"), None)
            .await
            .unwrap();
        let other = services
            .start_service("cell-2", "web", "npm run dev", Path::new("/tmp"), None)
            .await
            .unwrap();

        let mut report = services.stop_cell_services("cell-1").await;
        report.released_ports.sort_unstable();
        assert_eq!(report.released_ports, vec![a.port, b.port]);
        assert_eq!(report.stopped.len(), 2);
        assert!(!services.is_port_reserved(a.port).await);
        assert!(services.is_port_reserved(other.port).await);
        assert!(services.hub.services().get_session(&a.id).is_none());

        let again = services.stop_cell_services("cell-1").await;
        assert_eq!(again, ServiceStopReport::default());
        assert_eq!(services.list().await.len(), 1);
    }

    #[tokio::test]
    async fn stop_unknown_service_is_not_found() {
        let spawner = FakeSpawner::new();
        let services = manager(&spawner, 4000, 4001);
        let err = services
            .stop_service(&ServiceId::new("svc-missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CellyardError>(),
            Some(CellyardError::ServiceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn blank_command_is_rejected_before_reserving() {
        let spawner = FakeSpawner::new();
        let services = manager(&spawner, 4000, 4000);
        let err = services
            .start_service("cell-1", "web", "  ", Path::new("/tmp"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CellyardError>(),
            Some(CellyardError::InvalidInput { field, .. }) if field == "command"
        ));
        assert!(!services.is_port_reserved(4000).await);
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn spawn_failure_returns_reserved_port() {
        let spawner = FakeSpawner::new();
        let services = manager(&spawner, 4000, 4000);
        spawner.fail_next_spawn("no shell");

        assert!(
            services
                .start_service("cell-1", "web", "npm run dev", Path::new("/tmp"), None)
                .await
                .is_err()
        );
        assert!(!services.is_port_reserved(4000).await);

        let svc = services
            .start_service("cell-1", "web", "npm run dev", Path::new("/tmp"), None)
            .await
            .unwrap();
        services.stop_service(&svc.id).await.unwrap();
        assert!(!services.is_port_reserved(4000).await);
    }
}
