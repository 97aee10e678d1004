use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A URL polled for availability.
///
/// `id` must be unique among targets and stable between successive target
/// list fetches: stored statuses are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    /// Display-only title.
    pub title: String,
    pub url: String,
}

impl Target {
    pub fn new(id: u64, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            url: url.into(),
        }
    }

    /// Whether `other` refers to the same endpoint: equal ID and URL.
    /// The title is ignored.
    pub fn same_identity(&self, other: &Target) -> bool {
        self.id == other.id && self.url == other.url
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.id, self.title, self.url)
    }
}

/// Classification of a single availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Ok,
    GenericError,
    Timeout,
    UrlParsingError,
    DnsLookupError,
    HttpError,
}

impl StatusType {
    pub const ALL: [StatusType; 6] = [
        StatusType::Ok,
        StatusType::GenericError,
        StatusType::Timeout,
        StatusType::UrlParsingError,
        StatusType::DnsLookupError,
        StatusType::HttpError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::GenericError => "Generic Error",
            Self::Timeout => "Timeout",
            Self::UrlParsingError => "URL Parsing Error",
            Self::DnsLookupError => "DNS Error",
            Self::HttpError => "HTTP Error",
        }
    }

    /// Case-insensitive prefix lookup, e.g. `"ok"`, `"http"` or `"time"`.
    /// The first type in declaration order whose name starts with `s` wins.
    pub fn parse_prefix(s: &str) -> Option<StatusType> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().to_lowercase().starts_with(&needle))
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status type '{0}'")]
pub struct ParseStatusTypeError(pub String);

impl FromStr for StatusType {
    type Err = ParseStatusTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseStatusTypeError(s.to_string()))
    }
}

/// Outcome of one availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status_type: StatusType,
    /// Failure detail. `None` when `status_type` is `Ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time spent on the attempt that produced this status.
    pub response_time: Duration,
    /// Set only when an HTTP response was actually received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
}

impl Status {
    pub fn ok(code: u16, response_time: Duration) -> Self {
        Self {
            status_type: StatusType::Ok,
            error: None,
            response_time,
            http_status_code: Some(code),
        }
    }

    pub fn http_error(code: u16, reason: &str, response_time: Duration) -> Self {
        let status_line = if reason.is_empty() {
            code.to_string()
        } else {
            format!("{} {}", code, reason)
        };
        Self {
            status_type: StatusType::HttpError,
            error: Some(format!("Server returned status '{}'", status_line)),
            response_time,
            http_status_code: Some(code),
        }
    }

    /// A failure without an HTTP response.
    pub fn failure(
        status_type: StatusType,
        error: impl Into<String>,
        response_time: Duration,
    ) -> Self {
        Self {
            status_type,
            error: Some(error.into()),
            response_time,
            http_status_code: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_type == StatusType::Ok
    }

    /// Multi-line description of every field, for terminal output.
    pub fn expanded(&self) -> String {
        let error = self.error.as_deref().map_or_else(
            || "none".to_string(),
            |e| format!("{:?}", e),
        );
        let http = match self.http_status_code {
            Some(code) => {
                let reason = reqwest::StatusCode::from_u16(code)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("");
                format!("{} {}", code, reason).trim_end().to_string()
            }
            None => "none".to_string(),
        };
        format!(
            "Status {{\n  Type = {},\n  Error = {},\n  Response Time = {:?},\n  HTTP Status = {},\n}}",
            self.status_type, error, self.response_time, http
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status {{ {}, {:?} }}", self.status_type, self.response_time)
    }
}

/// A target paired with the status of its latest check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target: Target,
    pub status: Status,
}

impl TargetStatus {
    pub fn new(target: Target, status: Status) -> Self {
        Self { target, status }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.status)
    }
}
