use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::poller::Poller;
use crate::status::TargetStatus;
use crate::target::TargetSource;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polls every target once per interval and streams the results.
pub struct Scheduler {
    targets: Arc<dyn TargetSource>,
    poller: Arc<dyn Poller>,
    poll_interval: Duration,
    max_parallel: usize,
    errors_tx: Option<mpsc::Sender<MonitorError>>,
}

impl Scheduler {
    pub fn new(
        targets: Arc<dyn TargetSource>,
        poller: Arc<dyn Poller>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            targets,
            poller,
            poll_interval: config.poll_interval.max(MIN_INTERVAL),
            max_parallel: config.max_parallel.max(1),
            errors_tx: None,
        }
    }

    /// Target source failures are sent here. Without a sender they are
    /// only logged.
    pub fn with_errors(mut self, errors_tx: mpsc::Sender<MonitorError>) -> Self {
        self.errors_tx = Some(errors_tx);
        self
    }

    pub(crate) fn set_errors(&mut self, errors_tx: mpsc::Sender<MonitorError>) {
        self.errors_tx = Some(errors_tx);
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Runs one poll cycle per tick until `shutdown` turns true (or its
    /// sender is dropped) or `statuses` is closed.
    ///
    /// Ticks fall on a fixed grid of `poll_interval` steps starting at the
    /// call, the first one a full interval later. Cycles never overlap:
    /// ticks that pass while a cycle is running are dropped rather than
    /// queued, so after a slow cycle the scheduler waits for the next grid
    /// point instead of starting a catch-up cycle immediately.
    pub async fn run(
        &self,
        statuses: mpsc::Sender<TargetStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let start = Instant::now();
        let mut next_tick = start + self.poll_interval;

        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            max_parallel = self.max_parallel,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() || statuses.is_closed() {
                break;
            }
            tokio::select! {
                _ = sleep_until(next_tick) => {
                    self.poll_targets(&statuses).await;
                    let now = Instant::now();
                    if now > next_tick + self.poll_interval {
                        debug!(
                            overrun_ms = (now - next_tick).as_millis() as u64,
                            "Poll cycle overran the interval, dropping missed ticks"
                        );
                    }
                    next_tick = next_tick_after(start, self.poll_interval, now);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Runs a single poll cycle: fetches the targets, polls them with at
    /// most `max_parallel` probes in flight and sends one result per
    /// target. Returns once every result has been sent.
    ///
    /// If the target source fails, nothing is polled and the error goes to
    /// the errors sender.
    pub async fn poll_targets(&self, statuses: &mpsc::Sender<TargetStatus>) -> usize {
        let targets = match self.targets.targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Failed to fetch targets, skipping poll cycle");
                if let Some(tx) = &self.errors_tx {
                    let _ = tx.send(MonitorError::Targets(e)).await;
                }
                return 0;
            }
        };

        let count = targets.len();
        debug!(count, "Poll cycle started");

        let poller = &*self.poller;
        let emitted = stream::iter(targets)
            .map(move |target| async move {
                let status = poller.poll(&target.url).await;
                debug!(target_id = target.id, status = %status.status_type, "Polled target");
                statuses.send(TargetStatus::new(target, status)).await.is_ok()
            })
            .buffer_unordered(self.max_parallel)
            .filter(|sent| future::ready(*sent))
            .count()
            .await;

        debug!(count, emitted, "Poll cycle finished");
        emitted
    }
}

/// First grid point `start + k * period` strictly after `now`.
fn next_tick_after(start: Instant, period: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(start).as_nanos();
    let period_ns = period.as_nanos().max(1);
    let steps = elapsed / period_ns + 1;
    start + Duration::from_nanos(u64::try_from(steps * period_ns).unwrap_or(u64::MAX))
}
