use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::change::ChangeDetector;
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::scheduler::Scheduler;
use crate::status::TargetStatus;
use crate::store::StatusStore;

/// Runs a scheduler and reports targets whose status changed.
///
/// Every poll result is compared with the last stored status of its
/// target; notable ones go out on the updates channel returned by
/// [`Monitor::new`], then the result is written back with the configured
/// TTL. The monitor owns its store, so it is the store's only writer.
pub struct Monitor {
    scheduler: Scheduler,
    detector: ChangeDetector,
    channel_capacity: usize,
}

impl Monitor {
    pub fn new(
        scheduler: Scheduler,
        store: Box<dyn StatusStore>,
        config: &MonitorConfig,
    ) -> (Self, mpsc::Receiver<TargetStatus>) {
        let (updates_tx, updates_rx) = mpsc::channel(config.channel_capacity.max(1));
        let detector = ChangeDetector::new(
            store,
            config.status_ttl,
            config.notify_first_ok,
            updates_tx,
        );
        let monitor = Self {
            scheduler,
            detector,
            channel_capacity: config.channel_capacity.max(1),
        };
        (monitor, updates_rx)
    }

    /// Attaches a stream of operational errors: target fetch failures from
    /// the scheduler and store read/write failures.
    ///
    /// Must be called before [`Monitor::run`]; without it errors are only
    /// logged. A full errors channel blocks the loop, so keep reading it.
    ///
    /// Calling it again replaces the previous stream.
    pub fn errors(&mut self) -> mpsc::Receiver<MonitorError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.scheduler.set_errors(tx.clone());
        self.detector.set_errors(tx);
        rx
    }

    pub fn poll_interval(&self) -> Duration {
        self.scheduler.poll_interval()
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    ///
    /// The scheduler runs on its own task; this loop handles its results
    /// one at a time. On shutdown the result channel is closed and the
    /// scheduler task is awaited, so probes still in flight finish before
    /// this returns. Results that arrive after shutdown are discarded.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            scheduler,
            mut detector,
            channel_capacity,
        } = self;

        let (statuses_tx, mut statuses_rx) = mpsc::channel(channel_capacity);
        let scheduler_shutdown = shutdown.clone();
        let scheduler_task =
            tokio::spawn(async move { scheduler.run(statuses_tx, scheduler_shutdown).await });

        info!("Monitor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                received = statuses_rx.recv() => match received {
                    Some(result) => {
                        detector.process(result).await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        drop(statuses_rx);
        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "Scheduler task failed");
        }

        info!("Monitor stopped");
    }
}
