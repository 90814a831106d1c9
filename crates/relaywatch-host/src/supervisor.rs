//! Process supervisor implementation

use async_trait::async_trait;
use relaywatch_host_api::{
    ChildHandle, HostError, HostResult, LaunchCommand, Supervisor, SupervisorEvent,
};
use relaywatch_util::LaunchId;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::registry::Registry;

/// Supervisor for the relay and any other long-lived child
pub struct ProcessSupervisor {
    registry: Arc<Registry>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            registry: Arc::new(Registry::new(tx)),
            event_rx: Mutex::new(Some(rx)),
        }
    }

    /// Look up a tracked child by launch ID
    pub fn get(&self, launch_id: &LaunchId) -> Option<ChildHandle> {
        self.registry.get(launch_id)
    }

    /// Number of children whose exit has not been reported yet
    pub fn tracked_count(&self) -> usize {
        self.registry.tracked_count()
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn launch(&self, command: LaunchCommand) -> HostResult<ChildHandle> {
        let launch_id = LaunchId::new();
        info!(launch_id = %launch_id, command = %command, "Spawning process");

        let launched = self.registry.launch(&launch_id, &command)?;

        if let Some((previous, process)) = launched.superseded {
            warn!(
                launch_id = %previous.launch_id,
                pid = previous.pid,
                "Previous child still running, superseding it"
            );
            if let Err(e) = process.terminate().await {
                warn!(pid = previous.pid, error = %e, "Failed to terminate superseded child");
            }
        }

        info!(
            launch_id = %launch_id,
            pid = launched.handle.pid,
            "Spawned process"
        );

        Ok(launched.handle)
    }

    async fn terminate(&self, launch_id: &LaunchId) -> HostResult<()> {
        let process = self
            .registry
            .process(launch_id)
            .ok_or(HostError::ChildNotFound)?;

        info!(launch_id = %launch_id, pid = process.pid, "Terminating process");
        process.terminate().await
    }

    fn current(&self) -> Option<ChildHandle> {
        self.registry.current()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SupervisorEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}
