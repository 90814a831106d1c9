//! Mock supervisor for testing

use async_trait::async_trait;
use relaywatch_util::LaunchId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::{
    ChildHandle, ExitStatus, HostError, HostResult, LaunchCommand, Supervisor, SupervisorEvent,
};

#[derive(Default)]
struct MockState {
    children: HashMap<LaunchId, ChildHandle>,
    current: Option<LaunchId>,
}

/// Mock supervisor for unit/integration testing
///
/// Never touches the OS. Launches hand out fake PIDs, exits are simulated
/// explicitly, and every terminate attempt is counted.
pub struct MockSupervisor {
    next_pid: AtomicU32,
    state: Mutex<MockState>,
    event_tx: mpsc::UnboundedSender<SupervisorEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
    terminate_calls: AtomicUsize,

    /// Configure launch to fail
    pub fail_spawn: Arc<AtomicBool>,

    /// Configure terminate to fail
    pub fail_stop: Arc<AtomicBool>,
}

impl MockSupervisor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            next_pid: AtomicU32::new(1000),
            state: Mutex::new(MockState::default()),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
            terminate_calls: AtomicUsize::new(0),
            fail_spawn: Arc::new(AtomicBool::new(false)),
            fail_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of terminate attempts, successful or not
    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    /// Number of children still tracked
    pub fn tracked_count(&self) -> usize {
        self.state.lock().unwrap().children.len()
    }

    /// Simulate the child exiting on its own
    pub fn simulate_exit(&self, launch_id: &LaunchId, status: ExitStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut handle) = state.children.remove(launch_id) {
            if state.current.as_ref() == Some(launch_id) {
                state.current = None;
            }
            handle.mark_exited(status.clone());
            let _ = self.event_tx.send(SupervisorEvent::Exited { handle, status });
        }
    }

    /// Simulate a chunk of output from the child
    pub fn simulate_output(&self, launch_id: &LaunchId, chunk: &[u8]) {
        let _ = self.event_tx.send(SupervisorEvent::Output {
            launch_id: launch_id.clone(),
            stream: crate::OutputStream::Stdout,
            chunk: chunk.to_vec(),
        });
    }
}

impl Default for MockSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn launch(&self, command: LaunchCommand) -> HostResult<ChildHandle> {
        let launch_id = LaunchId::new();

        if self.fail_spawn.load(Ordering::SeqCst) {
            let error = format!("Failed to spawn {}: mock spawn failure", command.program);
            let _ = self.event_tx.send(SupervisorEvent::SpawnFailed {
                launch_id,
                command,
                error: error.clone(),
            });
            return Err(HostError::SpawnFailed(error));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let handle = ChildHandle::new(launch_id.clone(), pid, command);

        let mut state = self.state.lock().unwrap();
        if let Some(previous) = state.current.take() {
            state.children.remove(&previous);
        }
        state.children.insert(launch_id.clone(), handle.clone());
        state.current = Some(launch_id);

        Ok(handle)
    }

    async fn terminate(&self, launch_id: &LaunchId) -> HostResult<()> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(HostError::StopFailed("Mock stop failure".into()));
        }

        if !self.state.lock().unwrap().children.contains_key(launch_id) {
            return Err(HostError::ChildNotFound);
        }

        // SIGTERM
        self.simulate_exit(launch_id, ExitStatus::signaled(15));
        Ok(())
    }

    fn current(&self) -> Option<ChildHandle> {
        let state = self.state.lock().unwrap();
        state
            .current
            .as_ref()
            .and_then(|id| state.children.get(id))
            .cloned()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SupervisorEvent>> {
        self.event_rx.lock().unwrap().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_launch_and_terminate() {
        let supervisor = MockSupervisor::new();
        let mut rx = supervisor.take_events().unwrap();

        let handle = supervisor
            .launch(LaunchCommand::new("relay"))
            .await
            .unwrap();

        assert_eq!(supervisor.current().unwrap().launch_id, handle.launch_id);

        supervisor.terminate(&handle.launch_id).await.unwrap();

        assert!(supervisor.current().is_none());
        assert_eq!(supervisor.terminate_calls(), 1);
        match rx.recv().await.unwrap() {
            SupervisorEvent::Exited { handle: exited, status } => {
                assert_eq!(exited.launch_id, handle.launch_id);
                assert!(!exited.is_alive());
                assert_eq!(status.signal, Some(15));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn mock_spawn_failure_emits_event() {
        let supervisor = MockSupervisor::new();
        let mut rx = supervisor.take_events().unwrap();
        supervisor.fail_spawn.store(true, Ordering::SeqCst);

        let result = supervisor.launch(LaunchCommand::new("relay")).await;

        assert!(matches!(result, Err(HostError::SpawnFailed(_))));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SupervisorEvent::SpawnFailed { .. }
        ));
        assert!(supervisor.current().is_none());
    }

    #[tokio::test]
    async fn mock_relaunch_supersedes() {
        let supervisor = MockSupervisor::new();

        let first = supervisor.launch(LaunchCommand::new("a")).await.unwrap();
        let second = supervisor.launch(LaunchCommand::new("b")).await.unwrap();

        assert_ne!(first.launch_id, second.launch_id);
        assert_eq!(supervisor.tracked_count(), 1);
        assert_eq!(supervisor.current().unwrap().launch_id, second.launch_id);
    }

    #[test]
    fn events_can_only_be_taken_once() {
        let supervisor = MockSupervisor::new();
        assert!(supervisor.take_events().is_some());
        assert!(supervisor.take_events().is_none());
    }
}
