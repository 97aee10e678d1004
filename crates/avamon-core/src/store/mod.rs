mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisOptions, RedisStore};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::status::{ParseStatusTypeError, Status, Target};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A live record exists under the target's ID but belongs to another
    /// URL, i.e. the ID was reused.
    #[error("target validation failed: stored {actual} does not match requested {expected}")]
    IdentityMismatch { expected: Target, actual: Target },
    #[error("Redis error: {0}")]
    Backend(#[from] ::redis::RedisError),
    #[error("Could not encode status record: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Could not decode status record: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Could not decode status record: {0}")]
    UnknownStatusType(#[from] ParseStatusTypeError),
    #[error("Invalid Redis connection options: {0}")]
    Options(String),
}

/// Storage of the latest status of every target, with expiry.
///
/// Methods take `&mut self`: a store has a single writer, the monitor loop
/// that owns it.
#[async_trait]
pub trait StatusStore: Send {
    /// Returns `Ok(None)` when no live record exists for the target.
    async fn get(&mut self, target: &Target) -> Result<Option<Status>, StoreError>;

    /// Overwrites the target's record; it expires `ttl` from now.
    async fn set(&mut self, target: &Target, status: &Status, ttl: Duration)
        -> Result<(), StoreError>;
}

fn check_identity(expected: &Target, actual: &Target) -> Result<(), StoreError> {
    if expected.same_identity(actual) {
        Ok(())
    } else {
        Err(StoreError::IdentityMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        })
    }
}
