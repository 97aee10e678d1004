//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [log]
//! format = "json"
//!
//! [monitor]
//! interval_ms = 10000
//! timeout_ms = 3000
//! ttl_ms = 120000
//!
//! [redis]
//! host = "localhost"
//! port = 6379
//!
//! [[target]]
//! id = 1
//! title = "Shop"
//! url = "https://shop.example.com"
//!
//! [[target]]
//! url = "blog.example.com"
//!
//! [[webhook]]
//! url = "https://hooks.example.com/avamon"
//! events = ["status_down"]
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use avamon_core::{MonitorConfig, RedisOptions, Target, WebhookConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub monitor: MonitorSection,

    /// Absent means statuses are kept in memory.
    #[serde(default)]
    pub redis: Option<RedisOptions>,

    #[serde(default)]
    pub target: Vec<TargetDef>,

    #[serde(default)]
    pub webhook: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Overrides of the [`MonitorConfig`] defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorSection {
    pub interval_ms: Option<u64>,
    pub max_parallel: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub timeout_retries: Option<u32>,
    pub ttl_ms: Option<u64>,
    pub notify_first_ok: Option<bool>,
}

impl MonitorSection {
    pub fn to_monitor_config(&self) -> MonitorConfig {
        let mut c = MonitorConfig::default();
        if let Some(v) = self.interval_ms {
            c = c.with_poll_interval(v);
        }
        if let Some(v) = self.max_parallel {
            c = c.with_max_parallel(v);
        }
        if let Some(v) = self.timeout_ms {
            c = c.with_request_timeout(v);
        }
        if let Some(v) = self.timeout_retries {
            c = c.with_timeout_retries(v);
        }
        if let Some(v) = self.ttl_ms {
            c = c.with_status_ttl(v);
        }
        if let Some(v) = self.notify_first_ok {
            c = c.with_notify_first_ok(v);
        }
        c
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetDef {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub url: String,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Targets with IDs defaulting to their 1-based position and titles
    /// defaulting to their URL.
    pub fn targets(&self) -> Vec<Target> {
        self.target
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Target::new(
                    t.id.unwrap_or(i as u64 + 1),
                    t.title.clone().unwrap_or_else(|| t.url.clone()),
                    t.url.clone(),
                )
            })
            .collect()
    }

    fn validate(&self) -> Result<(), String> {
        match self.log.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        for (i, t) in self.target.iter().enumerate() {
            if t.url.trim().is_empty() {
                return Err(format!("Target at index {} has an empty URL", i));
            }
        }

        let mut ids = HashSet::new();
        for t in self.targets() {
            if !ids.insert(t.id) {
                return Err(format!("Duplicate target ID: {}", t.id));
            }
        }

        for (i, wh) in self.webhook.iter().enumerate() {
            url::Url::parse(&wh.url)
                .map_err(|e| format!("Invalid webhook URL at index {}: {} ({})", i, wh.url, e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn parse_empty_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.log.format, "pretty");
        assert!(config.redis.is_none());
        assert!(config.targets().is_empty());
        assert_eq!(config.monitor.to_monitor_config(), MonitorConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[log]
format = "json"

[monitor]
interval_ms = 10000
max_parallel = 8
timeout_ms = 2000
timeout_retries = 1
ttl_ms = 120000
notify_first_ok = true

[redis]
host = "cache.internal"
password = "secret"
db = 2

[[target]]
id = 10
title = "Shop"
url = "https://shop.example.com"

[[target]]
url = "blog.example.com"

[[webhook]]
url = "https://hooks.example.com/avamon"
events = ["status_down"]
secret = "my-key"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.log.format, "json");

        let mc = config.monitor.to_monitor_config();
        assert_eq!(mc.poll_interval, Duration::from_secs(10));
        assert_eq!(mc.max_parallel, 8);
        assert_eq!(mc.request_timeout, Duration::from_secs(2));
        assert_eq!(mc.timeout_retries, 1);
        assert_eq!(mc.status_ttl, Duration::from_secs(120));
        assert!(mc.notify_first_ok);

        let redis = config.redis.as_ref().unwrap();
        assert_eq!(redis.host, "cache.internal");
        assert_eq!(redis.port, 6379);
        assert_eq!(redis.password.as_deref(), Some("secret"));
        assert_eq!(redis.db, 2);

        let targets = config.targets();
        assert_eq!(targets[0], Target::new(10, "Shop", "https://shop.example.com"));
        assert_eq!(targets[1], Target::new(2, "blog.example.com", "blog.example.com"));

        assert_eq!(config.webhook[0].events, vec!["status_down"]);
        assert_eq!(config.webhook[0].secret.as_deref(), Some("my-key"));
        assert_eq!(config.webhook[0].max_retries, 2);
    }

    #[test]
    fn validate_rejects_duplicate_target_ids() {
        let toml = r#"
[[target]]
url = "https://a.example.com"

[[target]]
id = 1
url = "https://b.example.com"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate target ID: 1"), "{}", err);
    }

    #[test]
    fn validate_rejects_empty_target_url() {
        let toml = r#"
[[target]]
title = "Nothing"
url = "  "
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("empty URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_webhook_url() {
        let toml = r#"
[[webhook]]
url = "not-valid"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid webhook URL"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[log]
format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log format"), "{}", err);
    }
}
