use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_identity, StatusStore, StoreError};
use crate::status::{Status, StatusType, Target, TargetStatus};

const KEY_PREFIX: &str = "avamon_status_";
const SCAN_BATCH: usize = 10;

/// Connection options of a Redis instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisOptions {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    6379
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            db: 0,
        }
    }
}

impl RedisOptions {
    pub fn to_url(&self) -> Result<String, StoreError> {
        let host = if self.host.is_empty() {
            default_host()
        } else {
            self.host.clone()
        };
        let mut url = url::Url::parse(&format!("redis://{}:{}/{}", host, self.port, self.db))
            .map_err(|e| StoreError::Options(e.to_string()))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| StoreError::Options("password cannot be set on URL".into()))?;
        }
        Ok(url.into())
    }
}

/// Status store backed by Redis. Expiry is delegated to Redis key TTLs.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(options: &RedisOptions) -> Result<Self, StoreError> {
        let client = Client::open(options.to_url()?)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Checks that the server answers `PING`.
    pub async fn ping(&mut self) -> Result<(), StoreError> {
        let _pong: String = ::redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }

    /// Lists every stored status. Records that vanish or cannot be decoded
    /// mid-scan are skipped.
    pub async fn scan(&mut self) -> Result<Vec<TargetStatus>, StoreError> {
        let pattern = format!("{}*", KEY_PREFIX);
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut self.conn)
                .await?;

            for key in keys {
                let value: Option<String> = match ::redis::cmd("GET")
                    .arg(&key)
                    .query_async(&mut self.conn)
                    .await
                {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(key = %key, error = %e, "Skipping unreadable status record");
                        continue;
                    }
                };
                let Some(value) = value else {
                    continue;
                };
                match decode_record(&value) {
                    Ok((target, status)) => found.push(TargetStatus::new(target, status)),
                    Err(e) => debug!(key = %key, error = %e, "Skipping undecodable status record"),
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(found)
    }
}

#[async_trait]
impl StatusStore for RedisStore {
    async fn get(&mut self, target: &Target) -> Result<Option<Status>, StoreError> {
        let value: Option<String> = ::redis::cmd("GET")
            .arg(status_key(target.id))
            .query_async(&mut self.conn)
            .await?;
        let Some(value) = value else {
            return Ok(None);
        };

        let (stored, status) = decode_record(&value)?;
        check_identity(target, &stored)?;
        Ok(Some(status))
    }

    async fn set(
        &mut self,
        target: &Target,
        status: &Status,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let value = encode_record(target, status)?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = ::redis::cmd("SET")
            .arg(status_key(target.id))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

pub fn status_key(target_id: u64) -> String {
    format!("{}{}", KEY_PREFIX, target_id)
}

#[derive(Debug, Serialize, Deserialize)]
struct RedisRecord {
    tid: u64,
    title: String,
    url: String,
    #[serde(rename = "type")]
    status_type: String,
    err: String,
    /// Response time in nanoseconds.
    time: u64,
    /// 0 when no response was received.
    http: u16,
}

fn encode_record(target: &Target, status: &Status) -> Result<String, StoreError> {
    let record = RedisRecord {
        tid: target.id,
        title: target.title.clone(),
        url: target.url.clone(),
        status_type: status.status_type.to_string(),
        err: status.error.clone().unwrap_or_default(),
        time: u64::try_from(status.response_time.as_nanos()).unwrap_or(u64::MAX),
        http: status.http_status_code.unwrap_or(0),
    };
    serde_json::to_string(&record).map_err(StoreError::Encode)
}

fn decode_record(value: &str) -> Result<(Target, Status), StoreError> {
    let record: RedisRecord = serde_json::from_str(value).map_err(StoreError::Decode)?;
    let status_type: StatusType = record.status_type.parse()?;

    let target = Target::new(record.tid, record.title, record.url);
    let status = Status {
        status_type,
        error: Some(record.err).filter(|e| !e.is_empty()),
        response_time: Duration::from_nanos(record.time),
        http_status_code: Some(record.http).filter(|&code| code != 0),
    };
    Ok((target, status))
}
