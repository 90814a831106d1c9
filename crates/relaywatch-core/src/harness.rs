//! The supervised-poll loop
//!
//! Launches the relay (unless running connect-only), starts the health
//! poller and routes supervisor events until a shutdown signal arrives or
//! the relay exits.

use relaywatch_host_api::{Supervisor, SupervisorEvent};
use relaywatch_probe::{
    HealthPoller, HttpProbe, PollEvent, PollState, Probe, ProbeResult, StopReason,
};
use relaywatch_util::LaunchId;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{HarnessConfig, ShutdownSignal, SignalCoordinator};

/// How a harness run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessExit {
    /// A shutdown signal arrived and cleanup ran
    Signal(ShutdownSignal),
    /// The launched relay exited and polling stopped
    ChildExited,
}

impl HarnessExit {
    /// Process exit code; the harness exits cleanly either way
    pub fn code(&self) -> i32 {
        0
    }
}

pub struct Harness<P = HttpProbe> {
    config: HarnessConfig,
    supervisor: Arc<dyn Supervisor>,
    probe: P,
}

impl Harness<HttpProbe> {
    pub fn new(config: HarnessConfig, supervisor: Arc<dyn Supervisor>) -> Self {
        let probe = HttpProbe::new(config.endpoint.clone(), config.timeout);
        Self::with_probe(config, supervisor, probe)
    }
}

impl<P: Probe + 'static> Harness<P> {
    pub fn with_probe(config: HarnessConfig, supervisor: Arc<dyn Supervisor>, probe: P) -> Self {
        Self {
            config,
            supervisor,
            probe,
        }
    }

    /// Run until `shutdown` resolves or the relay exits
    pub async fn run<F>(self, shutdown: F) -> HarnessExit
    where
        F: Future<Output = ShutdownSignal>,
    {
        let Harness {
            config,
            supervisor,
            probe,
        } = self;

        let mut supervisor_events = supervisor.take_events();
        if supervisor_events.is_none() {
            warn!("Supervisor events already taken, relay output will not be shown");
        }

        let coordinator = SignalCoordinator::new(supervisor.clone());
        let launch_id = launch(&config, supervisor.as_ref()).await;

        info!(
            endpoint = %config.endpoint,
            interval = ?config.interval,
            timeout = ?config.timeout,
            "Issuing ping requests"
        );

        let state = PollState::new();
        let (poller, mut poll_events) =
            HealthPoller::new(probe, config.interval, state.clone()).start();

        let mut last_result: Option<ProbeResult> = None;
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                signal = &mut shutdown => {
                    poller.stop();
                    coordinator.shutdown(signal).await;
                    break HarnessExit::Signal(signal);
                }

                Some(event) = next_supervisor_event(&mut supervisor_events) => {
                    handle_supervisor_event(&config, &state, launch_id.as_ref(), event);
                }

                Some(event) = poll_events.recv() => match event {
                    PollEvent::Probed(result) => last_result = Some(result),
                    PollEvent::Skipped { .. } => {}
                    PollEvent::Stopped { reason: StopReason::ChildExited } => {
                        break HarnessExit::ChildExited;
                    }
                    PollEvent::Stopped { reason: StopReason::Requested } => {
                        debug!("Health poller stopped");
                    }
                },
            }
        };

        poller.stop();
        poller.join().await;

        info!(
            exit = ?exit,
            ticks = state.ticks(),
            issued = state.issued(),
            skipped = state.skipped(),
            last_healthy = ?last_result.as_ref().map(|r| r.healthy),
            "Harness finished"
        );

        exit
    }
}

/// Launch the relay if configured; the launch ID of the child on success
async fn launch(config: &HarnessConfig, supervisor: &dyn Supervisor) -> Option<LaunchId> {
    let Some(relay) = &config.relay else {
        info!("Connect-only mode, not launching the relay");
        return None;
    };

    let command = relay.command();
    debug!(command = %command, "Spawning WSL process");

    match supervisor.launch(command).await {
        Ok(handle) => {
            info!(
                pid = handle.pid,
                launch_id = %handle.launch_id,
                command = %handle.command,
                "Relay started"
            );
            Some(handle.launch_id)
        }
        Err(e) => {
            // An already running relay may still answer
            warn!(error = %e, "Relay did not start, polling anyway");
            None
        }
    }
}

async fn next_supervisor_event(
    events: &mut Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
) -> Option<SupervisorEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn handle_supervisor_event(
    config: &HarnessConfig,
    state: &PollState,
    launch_id: Option<&LaunchId>,
    event: SupervisorEvent,
) {
    match event {
        SupervisorEvent::Output {
            launch_id,
            stream,
            chunk,
        } => {
            debug!(
                launch_id = %launch_id,
                stream = %stream,
                chunk = %String::from_utf8_lossy(&chunk),
                "Chunk received"
            );
        }

        SupervisorEvent::Exited { handle, status } => {
            if launch_id != Some(&handle.launch_id) {
                debug!(pid = handle.pid, status = %status, "Superseded child exited");
                return;
            }

            info!(
                pid = handle.pid,
                status = %status,
                command = %handle.command,
                "Child process exited"
            );

            if config.keep_polling_after_exit {
                debug!("Polling continues after relay exit");
            } else {
                state.mark_child_exited();
            }
        }

        SupervisorEvent::SpawnFailed { command, error, .. } => {
            error!(command = %command, error = %error, "Unable to spawn");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Local;
    use relaywatch_host_api::{ExitStatus, MockSupervisor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CountingProbe {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn check(&self) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProbeResult {
                healthy: true,
                status: Some(200),
                error: None,
                elapsed: Duration::ZERO,
                body: Some("OK".into()),
                checked_at: Local::now(),
            }
        }
    }

    fn test_config(launch: bool) -> HarnessConfig {
        let mut config = HarnessConfig::new("/tmp/relaywatch-test.sock", "http://d").unwrap();
        config.interval = Duration::from_millis(100);
        config.timeout = Duration::from_secs(1);
        if !launch {
            config.relay = None;
        }
        config
    }

    async fn signal_after(delay: Duration, signal: ShutdownSignal) -> ShutdownSignal {
        tokio::time::sleep(delay).await;
        signal
    }

    #[tokio::test(start_paused = true)]
    async fn connect_only_polls_until_signal() {
        let supervisor = Arc::new(MockSupervisor::new());
        let probe = CountingProbe::default();
        let harness = Harness::with_probe(test_config(false), supervisor.clone(), probe.clone());

        let exit = harness
            .run(signal_after(Duration::from_millis(1_050), ShutdownSignal::Interrupt))
            .await;

        assert_eq!(exit, HarnessExit::Signal(ShutdownSignal::Interrupt));
        assert_eq!(exit.code(), 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 10);
        assert_eq!(supervisor.terminate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_terminates_launched_relay() {
        let supervisor = Arc::new(MockSupervisor::new());
        let harness =
            Harness::with_probe(test_config(true), supervisor.clone(), CountingProbe::default());

        let exit = harness
            .run(signal_after(Duration::from_millis(350), ShutdownSignal::Terminate))
            .await;

        assert_eq!(exit, HarnessExit::Signal(ShutdownSignal::Terminate));
        assert_eq!(supervisor.terminate_calls(), 1);
        assert_eq!(supervisor.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_exit_stops_polling() {
        let supervisor = Arc::new(MockSupervisor::new());
        let probe = CountingProbe::default();
        let harness = Harness::with_probe(test_config(true), supervisor.clone(), probe.clone());

        let run = tokio::spawn(harness.run(std::future::pending::<ShutdownSignal>()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let child = supervisor.current().unwrap();
        supervisor.simulate_exit(&child.launch_id, ExitStatus::with_code(1));

        let exit = run.await.unwrap();

        assert_eq!(exit, HarnessExit::ChildExited);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.terminate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_polling_after_relay_exit() {
        let supervisor = Arc::new(MockSupervisor::new());
        let probe = CountingProbe::default();
        let mut config = test_config(true);
        config.keep_polling_after_exit = true;
        let harness = Harness::with_probe(config, supervisor.clone(), probe.clone());

        let exiter = supervisor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            if let Some(child) = exiter.current() {
                exiter.simulate_exit(&child.launch_id, ExitStatus::with_code(0));
            }
        });

        let exit = harness
            .run(signal_after(Duration::from_millis(1_050), ShutdownSignal::Quit))
            .await;

        assert_eq!(exit, HarnessExit::Signal(ShutdownSignal::Quit));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 10);
        // Nothing left to terminate
        assert_eq!(supervisor.terminate_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_keeps_polling() {
        let supervisor = Arc::new(MockSupervisor::new());
        supervisor.fail_spawn.store(true, Ordering::SeqCst);
        let probe = CountingProbe::default();
        let harness = Harness::with_probe(test_config(true), supervisor.clone(), probe.clone());

        let exit = harness
            .run(signal_after(Duration::from_millis(550), ShutdownSignal::Interrupt))
            .await;

        assert_eq!(exit, HarnessExit::Signal(ShutdownSignal::Interrupt));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
        assert_eq!(supervisor.terminate_calls(), 0);
    }
}
