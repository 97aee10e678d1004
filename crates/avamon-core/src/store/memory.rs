use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{check_identity, StatusStore, StoreError};
use crate::status::{Status, Target};

#[derive(Debug, Clone)]
struct Record {
    target: Target,
    status: Status,
    expires_at: Instant,
}

/// Process-local status store. Expired records are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<u64, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, including ones that expired but were not
    /// read since.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn get(&mut self, target: &Target) -> Result<Option<Status>, StoreError> {
        let Some(record) = self.records.get(&target.id) else {
            return Ok(None);
        };
        if Instant::now() >= record.expires_at {
            self.records.remove(&target.id);
            return Ok(None);
        }
        check_identity(target, &record.target)?;
        Ok(Some(record.status.clone()))
    }

    async fn set(
        &mut self,
        target: &Target,
        status: &Status,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.records.insert(
            target.id,
            Record {
                target: target.clone(),
                status: status.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
