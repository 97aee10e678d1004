use std::time::Duration;

use avamon_core::{HttpPoller, Poller, StatusType};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

// Lives in its own test binary: the proxy variables are process-wide.
#[tokio::test]
async fn test_poller_goes_through_environment_proxy() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&proxy)
        .await;

    std::env::remove_var("NO_PROXY");
    std::env::remove_var("no_proxy");
    std::env::set_var("HTTP_PROXY", proxy.uri());
    std::env::set_var("http_proxy", proxy.uri());

    let poller = HttpPoller::new(Duration::from_secs(5), 0).unwrap();
    // Only reachable through the proxy: the host does not resolve.
    let status = poller.poll("http://shop.avamon.invalid/health").await;

    assert_eq!(status.status_type, StatusType::Ok);
    assert_eq!(status.http_status_code, Some(200));
    assert_eq!(proxy.received_requests().await.unwrap().len(), 1);
}
