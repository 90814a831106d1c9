//! Registry of launched children keyed by launch ID

use relaywatch_host_api::{
    ChildHandle, ExitStatus, HostResult, LaunchCommand, SupervisorEvent,
};
use relaywatch_util::LaunchId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::process::ManagedProcess;

struct Tracked {
    handle: ChildHandle,
    process: ManagedProcess,
}

#[derive(Default)]
struct RegistryState {
    children: HashMap<LaunchId, Tracked>,
    /// Most recent launch; the only one that is not superseded
    current: Option<LaunchId>,
}

/// Result of registering a new launch
pub(crate) struct Launched {
    pub handle: ChildHandle,
    /// Previous child that was still live and is now untracked
    pub superseded: Option<(ChildHandle, ManagedProcess)>,
}

/// Children the supervisor still reports on
///
/// Events from children that are no longer registered (superseded, or
/// already reported as exited) are dropped here, so each launch yields at
/// most one exit event and a superseded child goes quiet.
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
    event_tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl Registry {
    pub fn new(event_tx: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            event_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn and register a child, making it the current one.
    ///
    /// The lock is held across the spawn so the child's tasks cannot report
    /// before it is registered. A spawn failure is reported as an event as
    /// well as returned.
    pub fn launch(self: &Arc<Self>, launch_id: &LaunchId, command: &LaunchCommand) -> HostResult<Launched> {
        let mut state = self.lock();

        let process = match ManagedProcess::spawn(launch_id, command, self.clone()) {
            Ok(process) => process,
            Err(e) => {
                let _ = self.event_tx.send(SupervisorEvent::SpawnFailed {
                    launch_id: launch_id.clone(),
                    command: command.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let superseded = state
            .current
            .take()
            .and_then(|previous| state.children.remove(&previous))
            .map(|tracked| (tracked.handle, tracked.process));

        let handle = ChildHandle::new(launch_id.clone(), process.pid, command.clone());
        state.children.insert(
            launch_id.clone(),
            Tracked {
                handle: handle.clone(),
                process,
            },
        );
        state.current = Some(launch_id.clone());

        Ok(Launched { handle, superseded })
    }

    /// Forward an event if its child is still tracked
    pub fn deliver(&self, event: SupervisorEvent) {
        let tracked = self.lock().children.contains_key(event.launch_id());
        if tracked {
            let _ = self.event_tx.send(event);
        } else {
            debug!(launch_id = %event.launch_id(), "Dropping event from untracked child");
        }
    }

    /// Record the exit of a child and report it, once
    pub fn complete(&self, launch_id: &LaunchId, status: ExitStatus) {
        let mut state = self.lock();

        let Some(tracked) = state.children.remove(launch_id) else {
            debug!(launch_id = %launch_id, status = %status, "Untracked child exited");
            return;
        };

        if state.current.as_ref() == Some(launch_id) {
            state.current = None;
        }

        let mut handle = tracked.handle;
        handle.mark_exited(status.clone());

        info!(
            launch_id = %launch_id,
            pid = handle.pid,
            command = %handle.command,
            status = %status,
            "Child process exited"
        );

        let _ = self.event_tx.send(SupervisorEvent::Exited { handle, status });
    }

    pub fn current(&self) -> Option<ChildHandle> {
        let state = self.lock();
        state
            .current
            .as_ref()
            .and_then(|id| state.children.get(id))
            .map(|t| t.handle.clone())
    }

    pub fn get(&self, launch_id: &LaunchId) -> Option<ChildHandle> {
        self.lock().children.get(launch_id).map(|t| t.handle.clone())
    }

    pub fn process(&self, launch_id: &LaunchId) -> Option<ManagedProcess> {
        self.lock().children.get(launch_id).map(|t| t.process.clone())
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().children.len()
    }
}
