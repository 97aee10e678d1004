use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::{Poller, PollerError};
use crate::config::MonitorConfig;
use crate::status::{Status, StatusType};

/// HTTP GET poller with a per-attempt timeout and retries on timeout.
#[derive(Debug, Clone)]
pub struct HttpPoller {
    client: Client,
    timeout_retries: u32,
}

impl HttpPoller {
    pub fn new(timeout: Duration, timeout_retries: u32) -> Result<Self, PollerError> {
        let client = Self::build_client(timeout)?;
        Ok(Self::with_client(client, timeout_retries))
    }

    /// Uses a prebuilt client; its timeout applies to every attempt.
    pub fn with_client(client: Client, timeout_retries: u32) -> Self {
        Self {
            client,
            timeout_retries,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self, PollerError> {
        Self::new(config.request_timeout, config.timeout_retries)
    }

    pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .gzip(true)
            .build()
    }

    async fn poll_once(&self, url: &str) -> Status {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                return Status::failure(StatusType::UrlParsingError, e.to_string(), Duration::ZERO)
            }
        };

        let started = Instant::now();
        let result = self.client.get(parsed).send().await;
        let elapsed = started.elapsed();

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Status::ok(status.as_u16(), elapsed)
                } else {
                    // hyper keeps the server's phrase only when it differs
                    // from the canonical one.
                    let reason = response
                        .extensions()
                        .get::<hyper::ext::ReasonPhrase>()
                        .and_then(|phrase| std::str::from_utf8(phrase.as_bytes()).ok())
                        .or(status.canonical_reason())
                        .unwrap_or("");
                    Status::http_error(status.as_u16(), reason, elapsed)
                }
            }
            Err(e) => classify_error(&e, elapsed),
        }
    }
}

#[async_trait]
impl Poller for HttpPoller {
    async fn poll(&self, url: &str) -> Status {
        let url = normalize_url(url);

        let mut attempt = 0;
        loop {
            let status = self.poll_once(&url).await;
            if status.status_type != StatusType::Timeout || attempt >= self.timeout_retries {
                return status;
            }
            attempt += 1;
            debug!(url = %url, attempt, "Poll timed out, retrying");
        }
    }
}

/// Prepends `http://` to URLs without an explicit http(s) scheme.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

fn classify_error(e: &reqwest::Error, elapsed: Duration) -> Status {
    let message = error_chain(e);
    if e.is_builder() {
        Status::failure(StatusType::UrlParsingError, message, Duration::ZERO)
    } else if e.is_timeout() {
        Status::failure(StatusType::Timeout, message, elapsed)
    } else if is_dns_error(e) {
        Status::failure(StatusType::DnsLookupError, message, elapsed)
    } else {
        Status::failure(StatusType::GenericError, message, elapsed)
    }
}

// hyper-util reports resolver failures as a connect error whose message is
// "dns error", wrapping the getaddrinfo io::Error.
fn is_dns_error(e: &reqwest::Error) -> bool {
    if !e.is_connect() {
        return false;
    }
    let mut source = e.source();
    while let Some(err) = source {
        let text = err.to_string();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = err.source();
    }
    false
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use reqwest::dns::{Name, Resolve, Resolving};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Resolver that knows no host at all.
    struct NoHosts;

    impl Resolve for NoHosts {
        fn resolve(&self, name: Name) -> Resolving {
            let host = name.as_str().to_string();
            Box::pin(async move {
                Err(io::Error::new(io::ErrorKind::NotFound, format!("no such host: {}", host)).into())
            })
        }
    }

    /// Serves one connection with a canned raw HTTP/1.1 response.
    async fn raw_http_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn normalize_url_adds_missing_scheme() {
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://example.com/x"), "https://example.com/x");
    }

    #[tokio::test]
    async fn poll_returns_ok_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/up"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let poller = HttpPoller::new(Duration::from_secs(5), 0).unwrap();
        let status = poller.poll(&format!("{}/up", server.uri())).await;
        assert_eq!(status.status_type, StatusType::Ok);
        assert_eq!(status.http_status_code, Some(200));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn poll_returns_http_error_on_500() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let poller = HttpPoller::new(Duration::from_secs(5), 2).unwrap();
        let status = poller.poll(&format!("{}/broken", server.uri())).await;
        assert_eq!(status.status_type, StatusType::HttpError);
        assert_eq!(status.http_status_code, Some(500));
        assert_eq!(
            status.error.as_deref(),
            Some("Server returned status '500 Internal Server Error'")
        );
    }

    #[tokio::test]
    async fn poll_keeps_the_servers_reason_phrase() {
        let url = raw_http_server(
            "HTTP/1.1 599 Upstream Melted\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let poller = HttpPoller::new(Duration::from_secs(5), 0).unwrap();
        let status = poller.poll(&url).await;
        assert_eq!(status.status_type, StatusType::HttpError);
        assert_eq!(status.http_status_code, Some(599));
        assert_eq!(
            status.error.as_deref(),
            Some("Server returned status '599 Upstream Melted'")
        );
    }

    #[tokio::test]
    async fn poll_accepts_bare_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let bare = server.uri().trim_start_matches("http://").to_string();
        let poller = HttpPoller::new(Duration::from_secs(5), 0).unwrap();
        let status = poller.poll(&bare).await;
        assert_eq!(status.status_type, StatusType::Ok);
        assert_eq!(status.http_status_code, Some(204));
    }

    #[tokio::test]
    async fn poll_retries_timeouts_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .expect(3)
            .mount(&server)
            .await;

        let poller = HttpPoller::new(Duration::from_millis(50), 2).unwrap();
        let status = poller.poll(&format!("{}/slow", server.uri())).await;
        assert_eq!(status.status_type, StatusType::Timeout);
        assert!(status.http_status_code.is_none());
        assert!(status.error.is_some());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn poll_stops_retrying_after_first_non_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let poller = HttpPoller::new(Duration::from_millis(50), 5).unwrap();
        let status = poller.poll(&format!("{}/flaky", server.uri())).await;
        assert_eq!(status.status_type, StatusType::Ok);
    }

    #[tokio::test]
    async fn poll_reports_malformed_url() {
        let poller = HttpPoller::new(Duration::from_secs(1), 2).unwrap();
        let status = poller.poll("http://[not-a-host").await;
        assert_eq!(status.status_type, StatusType::UrlParsingError);
        assert_eq!(status.response_time, Duration::ZERO);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn poll_reports_connection_refused_as_generic_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let poller = HttpPoller::new(Duration::from_secs(2), 0).unwrap();
        let status = poller.poll(&format!("http://{}", addr)).await;
        assert_eq!(status.status_type, StatusType::GenericError);
        assert!(status.http_status_code.is_none());
    }

    #[tokio::test]
    async fn poll_reports_unresolvable_host() {
        let poller = HttpPoller::new(Duration::from_secs(5), 0).unwrap();
        let status = poller.poll("http://avamon-no-such-host.invalid").await;
        assert_eq!(status.status_type, StatusType::DnsLookupError);
    }

    #[tokio::test]
    async fn poll_classifies_resolver_failure_as_dns_error() {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .dns_resolver(Arc::new(NoHosts))
            .build()
            .unwrap();
        let poller = HttpPoller::with_client(client, 2);

        let status = poller.poll("http://shop.example.com/health").await;
        assert_eq!(status.status_type, StatusType::DnsLookupError);
        assert!(status.http_status_code.is_none());
        assert!(status.error.unwrap().contains("no such host"));
    }
}
