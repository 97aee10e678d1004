use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a monitor instance and the scheduler/poller it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between poll cycles (default: 5s).
    pub poll_interval: Duration,
    /// Maximum number of probes in flight during one cycle (default: 5).
    pub max_parallel: usize,
    /// Timeout of a single HTTP attempt (default: 3s).
    pub request_timeout: Duration,
    /// Extra attempts made when an attempt times out (default: 2).
    pub timeout_retries: u32,
    /// Lifetime of every stored status (default: 60s).
    pub status_ttl: Duration,
    /// Notify when a target is first seen healthy (default: false).
    pub notify_first_ok: bool,
    /// Capacity of the statuses, updates and errors channels.
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_parallel: 5,
            request_timeout: Duration::from_secs(3),
            timeout_retries: 2,
            status_ttl: Duration::from_secs(60),
            notify_first_ok: false,
            channel_capacity: 16,
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_timeout_retries(mut self, retries: u32) -> Self {
        self.timeout_retries = retries;
        self
    }

    pub fn with_status_ttl(mut self, ms: u64) -> Self {
        self.status_ttl = Duration::from_millis(ms);
        self
    }

    pub fn with_notify_first_ok(mut self, enabled: bool) -> Self {
        self.notify_first_ok = enabled;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Longest time a single probe may take when every attempt times out.
    pub fn worst_case_poll(&self) -> Duration {
        self.request_timeout
            .checked_mul(self.timeout_retries.saturating_add(1))
            .unwrap_or(Duration::MAX)
    }

    /// A stored status may expire before the next probe of its target
    /// finishes, which turns a steady failure into repeated notifications.
    pub fn ttl_shorter_than_poll(&self) -> bool {
        self.worst_case_poll() >= self.status_ttl
    }
}
