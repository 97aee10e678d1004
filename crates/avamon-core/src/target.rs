use async_trait::async_trait;
use thiserror::Error;

use crate::status::Target;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TargetsError {
    message: String,
}

impl TargetsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Source of the targets to poll, queried once per poll cycle.
///
/// Frontends implement this to keep targets in a database or config file.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn targets(&self) -> Result<Vec<Target>, TargetsError>;
}

/// A fixed list of targets.
#[derive(Debug, Clone, Default)]
pub struct StaticTargets {
    targets: Vec<Target>,
}

impl StaticTargets {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Targets numbered from 1 in input order, titled by their URL.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| {
                let url = url.into();
                Target::new(i as u64 + 1, url.clone(), url)
            })
            .collect();
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl TargetSource for StaticTargets {
    async fn targets(&self) -> Result<Vec<Target>, TargetsError> {
        Ok(self.targets.clone())
    }
}
