use thiserror::Error;

use crate::store::StoreError;
use crate::target::TargetsError;

/// Operational errors reported on a monitor's errors stream.
///
/// None of these stop monitoring: a failed target fetch skips one cycle, a
/// failed store read is treated as a missing record.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Could not fetch targets: {0}")]
    Targets(#[from] TargetsError),
    #[error("Could not read status of target {target_id}: {source}")]
    StoreRead {
        target_id: u64,
        #[source]
        source: StoreError,
    },
    #[error("Could not write status of target {target_id}: {source}")]
    StoreWrite {
        target_id: u64,
        #[source]
        source: StoreError,
    },
}

impl MonitorError {
    pub fn target_id(&self) -> Option<u64> {
        match self {
            Self::Targets(_) => None,
            Self::StoreRead { target_id, .. } | Self::StoreWrite { target_id, .. } => {
                Some(*target_id)
            }
        }
    }
}
