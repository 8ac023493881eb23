//! Background task that triggers sync passes.
//!
//! Triggers:
//! - A fixed interval (first tick at startup)
//! - Connectivity going from offline to online
//! - Manual requests through [`SchedulerHandle::trigger`]
//!
//! Passes run on tokio's blocking pool because the orchestrator is
//! synchronous.

use crate::connectivity::Connectivity;
use crate::error::SyncResult;
use crate::orchestrator::{SyncOrchestrator, SyncOutcome};
use crate::repository::EntityRepository;
use crate::transport::HttpClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Something that can run a sync pass.
pub trait Synchronizer: Send + Sync + 'static {
    /// Runs one pass.
    fn sync(&self) -> SyncResult<SyncOutcome>;
}

impl<C, R> Synchronizer for SyncOrchestrator<C, R>
where
    C: HttpClient + 'static,
    R: EntityRepository + 'static,
{
    fn sync(&self) -> SyncResult<SyncOutcome> {
        SyncOrchestrator::sync(self)
    }
}

/// Why a pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Interval,
    Reconnect,
    Manual,
}

/// Background sync scheduler.
struct SyncTask<S: Synchronizer> {
    synchronizer: Arc<S>,
    interval: Duration,
    connectivity: watch::Receiver<Connectivity>,
    manual_rx: mpsc::UnboundedReceiver<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S: Synchronizer> SyncTask<S> {
    async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "sync scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconnects = self.connectivity.borrow_and_update().reconnects;
        let mut watching = true;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("sync scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.run_pass(Trigger::Interval).await;
                }
                changed = self.connectivity.changed(), if watching => {
                    if changed.is_err() {
                        debug!("connectivity monitor dropped, interval triggers only");
                        watching = false;
                        continue;
                    }
                    let state = *self.connectivity.borrow_and_update();
                    let reconnected = state.reconnects > reconnects;
                    reconnects = state.reconnects;
                    if reconnected && state.online {
                        self.run_pass(Trigger::Reconnect).await;
                    }
                }
                Some(()) = self.manual_rx.recv() => {
                    self.run_pass(Trigger::Manual).await;
                }
            }
        }
    }

    async fn run_pass(&self, trigger: Trigger) {
        debug!(?trigger, "triggering sync pass");
        let synchronizer = Arc::clone(&self.synchronizer);
        match tokio::task::spawn_blocking(move || synchronizer.sync()).await {
            Ok(Ok(SyncOutcome::Completed(report))) => {
                debug!(?trigger, dispatched = report.dispatched.len(), "scheduled pass completed");
            }
            Ok(Ok(outcome)) => {
                debug!(?trigger, ?outcome, "scheduled pass skipped");
            }
            Ok(Err(e)) => {
                warn!(?trigger, error = %e, "scheduled pass failed");
            }
            Err(e) => {
                error!(?trigger, error = %e, "sync pass panicked");
            }
        }
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    manual_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Spawns the scheduler on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<S: Synchronizer>(
        synchronizer: Arc<S>,
        interval: Duration,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let (manual_tx, manual_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SyncTask {
            synchronizer,
            interval,
            connectivity,
            manual_rx,
            shutdown_rx,
        };

        Self {
            manual_tx,
            shutdown_tx,
            task: tokio::spawn(task.run()),
        }
    }

    /// Requests a pass as soon as the scheduler is free.
    pub fn trigger(&self) {
        if self.manual_tx.send(()).is_err() {
            debug!("sync scheduler already stopped");
        }
    }

    /// Stops the scheduler after any running pass finishes.
    pub async fn shutdown(self) {
        // An error means the task is already gone
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "sync scheduler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::orchestrator::SyncReport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSync {
        passes: AtomicUsize,
        pass_time: Duration,
    }

    impl Synchronizer for CountingSync {
        fn sync(&self) -> SyncResult<SyncOutcome> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.pass_time);
            Ok(SyncOutcome::Completed(SyncReport::default()))
        }
    }

    async fn wait_for_passes(sync: &CountingSync, expected: usize) {
        for _ in 0..200 {
            if sync.passes.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} passes, saw {}",
            sync.passes.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn first_tick_runs_a_pass() {
        let sync = Arc::new(CountingSync::default());
        let monitor = ConnectivityMonitor::new(true);
        let handle = SchedulerHandle::spawn(sync.clone(), Duration::from_secs(3600), monitor.watch());

        wait_for_passes(&sync, 1).await;
        handle.shutdown().await;
        assert_eq!(sync.passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_triggers_a_pass() {
        let sync = Arc::new(CountingSync::default());
        let monitor = ConnectivityMonitor::new(false);
        let handle = SchedulerHandle::spawn(sync.clone(), Duration::from_secs(3600), monitor.watch());
        wait_for_passes(&sync, 1).await;

        monitor.set_online(true);
        wait_for_passes(&sync, 2).await;

        // Going offline does not trigger
        monitor.set_online(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.passes.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn reconnect_during_a_pass_is_not_lost() {
        let sync = Arc::new(CountingSync {
            pass_time: Duration::from_millis(100),
            ..Default::default()
        });
        let monitor = ConnectivityMonitor::new(true);
        let handle = SchedulerHandle::spawn(sync.clone(), Duration::from_secs(3600), monitor.watch());
        wait_for_passes(&sync, 1).await;

        // Both changes land while the startup pass is still running
        monitor.set_online(false);
        monitor.set_online(true);
        wait_for_passes(&sync, 2).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_trigger_runs_a_pass() {
        let sync = Arc::new(CountingSync::default());
        let monitor = ConnectivityMonitor::new(true);
        let handle = SchedulerHandle::spawn(sync.clone(), Duration::from_secs(3600), monitor.watch());
        wait_for_passes(&sync, 1).await;

        handle.trigger();
        wait_for_passes(&sync, 2).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn interval_repeats() {
        let sync = Arc::new(CountingSync::default());
        let monitor = ConnectivityMonitor::new(true);
        let handle = SchedulerHandle::spawn(sync.clone(), Duration::from_millis(20), monitor.watch());

        wait_for_passes(&sync, 3).await;
        handle.shutdown().await;
    }
}
