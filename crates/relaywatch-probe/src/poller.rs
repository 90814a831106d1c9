//! Fixed-interval health poller
//!
//! Each tick either issues one probe or, if the previous probe has not
//! finished, skips. Probes run as their own tasks so the timer keeps its
//! cadence while a slow probe is outstanding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{Probe, ProbeResult};

/// Default time between ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Why the poller stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called or the handle was dropped
    Requested,
    /// The supervised child exited
    ChildExited,
}

/// Events emitted by the poller
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A probe finished
    Probed(ProbeResult),
    /// A tick fired while a probe was in flight
    Skipped { tick: u64 },
    /// The timer is cancelled; no further events follow
    Stopped { reason: StopReason },
}

/// State shared between the poll loop, its probe tasks and the harness
#[derive(Debug, Default)]
pub struct PollState {
    in_flight: AtomicBool,
    child_exited: AtomicBool,
    stopped: AtomicBool,
    ticks: AtomicU64,
    skipped: AtomicU64,
    issued: AtomicU64,
}

impl PollState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the in-flight slot; `None` if a probe is already running
    pub fn try_begin(self: &Arc<Self>) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                state: Arc::clone(self),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Called when the supervised child exits; the poller stops on its next tick
    pub fn mark_child_exited(&self) {
        self.child_exited.store(true, Ordering::Release);
    }

    pub fn child_exited(&self) -> bool {
        self.child_exited.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

/// Marks the poller idle again when dropped, on every exit path
pub struct InFlightGuard {
    state: Arc<PollState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

/// Poller that has not been started yet
pub struct HealthPoller<P> {
    probe: Arc<P>,
    interval: Duration,
    state: Arc<PollState>,
}

impl<P: Probe + 'static> HealthPoller<P> {
    pub fn new(probe: P, interval: Duration, state: Arc<PollState>) -> Self {
        Self {
            probe: Arc::new(probe),
            interval,
            state,
        }
    }

    /// Start the timer. The first tick fires one interval from now.
    pub fn start(self) -> (PollerHandle, mpsc::UnboundedReceiver<PollEvent>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = self.state.clone();

        let task = tokio::spawn(self.run(stop_rx, event_tx));

        (
            PollerHandle {
                stop_tx,
                state,
                task,
            },
            event_rx,
        )
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>, events: mpsc::UnboundedSender<PollEvent>) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?self.interval, "Health poller started");

        let reason = loop {
            tokio::select! {
                biased;

                _ = stop_rx.changed() => break StopReason::Requested,

                _ = interval.tick() => {
                    if self.state.is_stopped() {
                        break StopReason::Requested;
                    }

                    let tick = self.state.ticks.fetch_add(1, Ordering::Relaxed) + 1;

                    if self.state.child_exited() {
                        info!("Child exited, stopping health poller");
                        break StopReason::ChildExited;
                    }

                    self.on_tick(tick, &events);
                }
            }
        };

        self.state.mark_stopped();
        debug!(reason = ?reason, "Health poller stopped");
        let _ = events.send(PollEvent::Stopped { reason });
    }

    fn on_tick(&self, tick: u64, events: &mpsc::UnboundedSender<PollEvent>) {
        let Some(guard) = self.state.try_begin() else {
            self.state.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(tick = tick, "A request is already in progress");
            let _ = events.send(PollEvent::Skipped { tick });
            return;
        };

        self.state.issued.fetch_add(1, Ordering::Relaxed);
        let probe = self.probe.clone();
        let events = events.clone();

        tokio::spawn(async move {
            let result = probe.check().await;
            drop(guard);

            if result.healthy {
                info!(
                    tick = tick,
                    status = ?result.status,
                    elapsed = ?result.elapsed,
                    body = result.body.as_deref().unwrap_or(""),
                    "Relay is healthy"
                );
            } else {
                warn!(
                    tick = tick,
                    status = ?result.status,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Relay health check failed"
                );
            }

            let _ = events.send(PollEvent::Probed(result));
        });
    }
}

/// Handle to a running poller
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    state: Arc<PollState>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancel the timer. No probe is issued after this returns; one already
    /// in flight is left to finish within its own timeout.
    pub fn stop(&self) {
        self.state.mark_stopped();
        let _ = self.stop_tx.send(true);
    }

    pub fn state(&self) -> &Arc<PollState> {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the poll loop to wind down
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Health poller task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Local;
    use std::sync::atomic::AtomicUsize;

    /// Probe that takes a fixed time and tracks concurrency
    #[derive(Default)]
    struct SlowProbe {
        delay: Duration,
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl SlowProbe {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Probe for SlowProbe {
        async fn check(&self) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            ProbeResult {
                healthy: true,
                status: Some(200),
                error: None,
                elapsed: self.delay,
                body: Some("OK".into()),
                checked_at: Local::now(),
            }
        }
    }

    /// Shares one probe between the poller and the test
    struct Shared(Arc<SlowProbe>);

    #[async_trait]
    impl Probe for Shared {
        async fn check(&self) -> ProbeResult {
            self.0.check().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probes_never_overlap() {
        let probe = Arc::new(SlowProbe::new(Duration::from_millis(250)));
        let state = PollState::new();
        let (handle, _events) =
            HealthPoller::new(Shared(probe.clone()), Duration::from_millis(100), state.clone()).start();

        tokio::time::sleep(Duration::from_millis(2_050)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(probe.max_running.load(Ordering::SeqCst), 1);
        assert!(state.skipped() >= 1);
        assert_eq!(state.issued() + state.skipped(), state.ticks());
        assert_eq!(probe.calls.load(Ordering::SeqCst) as u64, state.issued());
        assert!(!state.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_probes_never_skip() {
        let probe = Arc::new(SlowProbe::new(Duration::from_millis(10)));
        let state = PollState::new();
        let (handle, _events) =
            HealthPoller::new(Shared(probe.clone()), Duration::from_millis(100), state.clone()).start();

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        handle.stop();

        assert_eq!(state.skipped(), 0);
        assert_eq!(state.ticks(), 10);
        assert_eq!(state.issued(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn no_probe_after_stop() {
        let probe = Arc::new(SlowProbe::new(Duration::from_millis(10)));
        let state = PollState::new();
        let (handle, mut events) =
            HealthPoller::new(Shared(probe.clone()), Duration::from_millis(100), state.clone()).start();

        tokio::time::sleep(Duration::from_millis(350)).await;
        handle.stop();
        let issued = state.issued();

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(state.issued(), issued);
        assert_eq!(probe.calls.load(Ordering::SeqCst) as u64, issued);
        assert!(state.is_stopped());
        assert!(handle.is_finished());

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(PollEvent::Stopped {
                reason: StopReason::Requested
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn child_exit_stops_poller() {
        let probe = Arc::new(SlowProbe::new(Duration::from_millis(10)));
        let state = PollState::new();
        let (handle, mut events) =
            HealthPoller::new(Shared(probe.clone()), Duration::from_millis(100), state.clone()).start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let issued = state.issued();
        state.mark_child_exited();

        handle.join().await;

        // The tick that notices the exit does not probe
        assert_eq!(state.issued(), issued);
        assert!(state.is_stopped());

        let mut stopped = None;
        while let Some(event) = events.recv().await {
            if let PollEvent::Stopped { reason } = event {
                stopped = Some(reason);
            }
        }
        assert_eq!(stopped, Some(StopReason::ChildExited));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_results_are_reported() {
        let probe = SlowProbe::new(Duration::from_millis(10));
        let (handle, mut events) =
            HealthPoller::new(probe, Duration::from_millis(100), PollState::new()).start();

        let first = events.recv().await.unwrap();
        handle.stop();

        match first {
            PollEvent::Probed(result) => {
                assert!(result.healthy);
                assert_eq!(result.status, Some(200));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn in_flight_guard_resets_on_drop() {
        let state = PollState::new();

        let guard = state.try_begin().unwrap();
        assert!(state.is_in_flight());
        assert!(state.try_begin().is_none());

        drop(guard);
        assert!(!state.is_in_flight());
        assert!(state.try_begin().is_some());
    }
}
