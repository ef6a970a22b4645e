//! End-to-end interception tests: rewrite, forwarding, relevance and capture.

use std::net::SocketAddr;
use std::time::Duration;
use capture_proxy::config::ProxyConfig;
use capture_proxy::tenant::User;

mod common;

#[tokio::test]
async fn test_tenant_request_is_rewritten_and_captured() {
    let backend_addr: SocketAddr = "127.0.0.1:28181".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28182".parse().unwrap();

    let seen = common::start_mock_backend(backend_addr, 200, "application/json", "{\"widgets\":[]}").await;
    let proxy = common::start_proxy(proxy_addr, common::acme_tenants(backend_addr), ProxyConfig::default()).await;
    let mut events = proxy.events.subscribe();

    let res = common::client()
        .get(format!("http://{}/acme/widgets?x=1", proxy_addr))
        .header("x-capture-project", "proj-acme")
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-capture-request"], "true");
    assert_eq!(res.headers()["x-forwarded-for"], "127.0.0.1");
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
    assert_eq!(res.text().await.unwrap(), "{\"widgets\":[]}");

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].request_line, "GET /widgets?x=1 HTTP/1.1");
        assert_eq!(seen[0].header("host"), Some(backend_addr.to_string().as_str()));
        assert!(seen[0].header("x-capture-project").is_none());
    }

    assert!(common::wait_for_captures(&proxy.captures, 1).await, "capture never persisted");
    let record = &proxy.captures.records()[0];
    assert_eq!(record.attribution.environment_slug.as_deref(), Some("acme"));
    assert_eq!(record.attribution.project_id.as_deref(), Some("proj-acme"));
    assert_eq!(record.request.url, "/acme/widgets?x=1");
    assert_eq!(record.response.status, 200);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event broadcast")
        .unwrap();
    assert_eq!(event.event, "request.create");
    assert_eq!(event.payload["model"], "request");
    assert_eq!(event.payload["data"]["id"], record.id.to_string());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_html_page_load_is_not_captured() {
    let backend_addr: SocketAddr = "127.0.0.1:28281".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28282".parse().unwrap();

    common::start_mock_backend(backend_addr, 200, "text/html", "<html></html>").await;
    let proxy = common::start_proxy(proxy_addr, common::acme_tenants(backend_addr), ProxyConfig::default()).await;

    let res = common::client()
        .get(format!("http://{}/acme/index.html", proxy_addr))
        .send()
        .await
        .expect("Proxy unreachable");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "<html></html>");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(proxy.captures.is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_upstream_down_returns_placeholder_and_is_captured() {
    // Nothing listens here.
    let backend_addr: SocketAddr = "127.0.0.1:28381".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28382".parse().unwrap();

    let proxy = common::start_proxy(proxy_addr, common::acme_tenants(backend_addr), ProxyConfig::default()).await;

    let res = common::client()
        .get(format!("http://{}/acme/widgets", proxy_addr))
        .send()
        .await
        .expect("Proxy unreachable");
    assert_eq!(res.status(), 503);
    assert_eq!(res.text().await.unwrap(), "Service not available. Is the server running?");

    assert!(common::wait_for_captures(&proxy.captures, 1).await, "failure was not captured");
    assert_eq!(proxy.captures.records()[0].response.status, 503);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_preflight_is_answered_locally() {
    let backend_addr: SocketAddr = "127.0.0.1:28481".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28482".parse().unwrap();

    let seen = common::start_mock_backend(backend_addr, 200, "application/json", "{}").await;
    let proxy = common::start_proxy(proxy_addr, common::acme_tenants(backend_addr), ProxyConfig::default()).await;

    let res = common::client()
        .request(reqwest::Method::OPTIONS, format!("http://{}/acme/widgets", proxy_addr))
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["access-control-allow-headers"], "content-type");
    assert_eq!(res.headers()["access-control-allow-credentials"], "true");
    assert!(res.headers().get("x-capture-request").is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(seen.lock().is_empty());
    assert!(proxy.captures.is_empty());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_capture_directives() {
    let backend_addr: SocketAddr = "127.0.0.1:28581".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28582".parse().unwrap();

    common::start_mock_backend(backend_addr, 201, "application/json", "{\"id\":1}").await;
    let tenants = common::acme_tenants(backend_addr);
    tenants.upsert_user(User {
        id: "user-1".into(),
        username: "alice".into(),
        token: "tok-alice".into(),
    });
    let proxy = common::start_proxy(proxy_addr, tenants, ProxyConfig::default()).await;
    let client = common::client();
    let url = format!("http://{}/acme/widgets", proxy_addr);

    // Ignored: never recorded.
    client
        .post(&url)
        .header("x-capture-ignore", "true")
        .body("{}")
        .send()
        .await
        .unwrap();

    // No context: recorded without attribution, but with the user.
    client
        .post(&url)
        .header("x-capture-no-context", "true")
        .header("x-capture-authorization", "tok-alice")
        .body("{\"name\":\"w\"}")
        .send()
        .await
        .unwrap();

    assert!(common::wait_for_captures(&proxy.captures, 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let records = proxy.captures.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attribution, Default::default());
    assert_eq!(records[0].user_id.as_deref(), Some("user-1"));
    assert_eq!(records[0].request.body, "{\"name\":\"w\"}");
    assert!(records[0]
        .request
        .headers
        .iter()
        .all(|(k, _)| k != "x-capture-authorization"));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let backend_addr: SocketAddr = "127.0.0.1:28681".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28682".parse().unwrap();

    let seen = common::start_mock_backend(backend_addr, 200, "application/json", "{}").await;
    let proxy = common::start_proxy(proxy_addr, common::acme_tenants(backend_addr), ProxyConfig::default()).await;
    let client = common::client();

    let mut handles = Vec::new();
    for i in 0..20 {
        let client = client.clone();
        let url = format!("http://{}/acme/items/{}", proxy_addr, i);
        handles.push(tokio::spawn(async move {
            client.post(url).body(format!("{{\"n\":{i}}}")).send().await
        }));
    }
    for handle in handles {
        let res = handle.await.unwrap().expect("Proxy unreachable");
        assert_eq!(res.status(), 200);
    }

    assert!(common::wait_for_captures(&proxy.captures, 20).await);
    assert_eq!(seen.lock().len(), 20);

    // Every capture pairs its own path with its own body.
    for record in proxy.captures.records() {
        let n = record.request.url.rsplit('/').next().unwrap().to_string();
        assert_eq!(record.request.body, format!("{{\"n\":{n}}}"));
    }

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_unknown_tenant_passes_through() {
    let backend_addr: SocketAddr = "127.0.0.1:28781".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:28782".parse().unwrap();

    let acme_upstream: SocketAddr = "127.0.0.1:28799".parse().unwrap();

    let seen = common::start_mock_backend(backend_addr, 200, "application/json", "{}").await;
    let proxy = common::start_proxy(proxy_addr, common::acme_tenants(acme_upstream), ProxyConfig::default()).await;

    // Absolute-form target naming the backend directly, as a forward proxy client would.
    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{}", proxy_addr)).unwrap())
        .build()
        .unwrap();
    let res = client
        .post(format!("http://{}/other/thing", backend_addr))
        .body("{}")
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), 200);
    assert!(res.headers().get("access-control-allow-origin").is_none());
    assert_eq!(seen.lock()[0].request_line, "POST /other/thing HTTP/1.1");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(proxy.captures.is_empty());

    proxy.shutdown.trigger();
}
