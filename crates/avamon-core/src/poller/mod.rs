mod http;

pub use http::{normalize_url, HttpPoller};

use async_trait::async_trait;
use thiserror::Error;

use crate::status::Status;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Checks a single URL for availability.
///
/// Failures are reported inside the returned [`Status`], never as errors.
/// Implementations hold no per-call state and may be called concurrently.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self, url: &str) -> Status;
}
