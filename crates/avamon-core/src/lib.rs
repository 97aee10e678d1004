#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod monitor;
pub mod poller;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod target;
pub mod webhook;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::{is_notable, Monitor};
pub use poller::{normalize_url, HttpPoller, Poller, PollerError};
pub use scheduler::Scheduler;
pub use status::{ParseStatusTypeError, Status, StatusType, Target, TargetStatus};
pub use store::{MemoryStore, RedisOptions, RedisStore, StatusStore, StoreError};
pub use target::{StaticTargets, TargetSource, TargetsError};
pub use webhook::{WebhookConfig, WebhookDispatcher, WebhookPayload};
