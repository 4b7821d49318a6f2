use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode as AxumStatus,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::StatusCode;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

use paygate_api::{app::build_app, forward::Forwarder};
use paygate_auth::{
    AccessLevel, AuthorizationEngine, PermissionSet, ResourceKind, RouteTable, SigningKey,
};

const UPSTREAM_KEY: &str = "pk_live_thisisateststripekey";

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path_and_query: String,
    authorization: Option<String>,
    body: String,
}

/// Stub upstream that records what it receives and always answers 418.
#[derive(Clone, Default)]
struct Teapot {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Teapot {
    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last(&self) -> Seen {
        self.seen.lock().unwrap().last().cloned().expect("upstream was never called")
    }
}

async fn teapot(State(teapot): State<Teapot>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();

    teapot.seen.lock().unwrap().push(Seen {
        method: parts.method.to_string(),
        path_and_query: parts.uri.path_and_query().map(|pq| pq.to_string()).unwrap_or_default(),
        authorization: parts
            .headers
            .get("authorization")
            .map(|v| v.to_str().unwrap().to_string()),
        body: String::from_utf8(body.to_vec()).unwrap(),
    });

    (
        AxumStatus::IM_A_TEAPOT,
        Json(json!({ "error": { "type": "invalid_request_error", "message": "I'm a teapot" } })),
    )
        .into_response()
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Harness {
    gateway: TestServer,
    _upstream: TestServer,
    teapot: Teapot,
}

async fn spawn_gateway() -> Harness {
    let teapot_state = Teapot::default();
    let upstream = TestServer::spawn(Router::new().fallback(teapot).with_state(teapot_state.clone())).await;

    let engine = AuthorizationEngine::new(
        SigningKey::new(UPSTREAM_KEY).unwrap(),
        UPSTREAM_KEY,
        RouteTable::stripe_default().unwrap(),
    )
    .unwrap();
    let forwarder = Forwarder::new(Url::parse(&upstream.base_url).unwrap()).unwrap();
    let gateway = TestServer::spawn(build_app(Arc::new(engine), forwarder)).await;

    Harness {
        gateway,
        _upstream: upstream,
        teapot: teapot_state,
    }
}

fn sign(p: &PermissionSet) -> String {
    SigningKey::new(UPSTREAM_KEY).unwrap().sign(p)
}

fn upstream_basic() -> String {
    format!("Basic {}", STANDARD.encode(format!("{UPSTREAM_KEY}:")))
}

async fn error_type(res: reqwest::Response) -> String {
    let body: serde_json::Value = res.json().await.unwrap();
    body["error"]["type"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn passing_request_is_forwarded_with_upstream_credential() {
    let h = spawn_gateway().await;
    let credential = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]));

    let res = reqwest::Client::new()
        .get(format!("{}/v1/customers", h.gateway.base_url))
        .bearer_auth(&credential)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(h.teapot.calls(), 1);

    let seen = h.teapot.last();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.path_and_query, "/v1/customers");
    assert_eq!(seen.authorization.as_deref(), Some(upstream_basic().as_str()));
    assert!(!seen.authorization.unwrap().contains(&credential));
}

#[tokio::test]
async fn basic_auth_username_is_accepted_as_credential() {
    let h = spawn_gateway().await;
    let credential = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]));

    let res = reqwest::Client::new()
        .get(format!("{}/v1/customers", h.gateway.base_url))
        .basic_auth(&credential, Some(""))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(h.teapot.last().authorization.as_deref(), Some(upstream_basic().as_str()));
}

#[tokio::test]
async fn bad_credential_is_rejected_without_forwarding() {
    let h = spawn_gateway().await;
    let credential = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]));
    let truncated = &credential[..credential.len() - 1];

    let res = reqwest::Client::new()
        .get(format!("{}/v1/customers", h.gateway.base_url))
        .bearer_auth(truncated)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_type(res).await, "authentication_error");
    assert_eq!(h.teapot.calls(), 0);
}

#[tokio::test]
async fn missing_credential_is_rejected() {
    let h = spawn_gateway().await;

    let res = reqwest::Client::new()
        .get(format!("{}/v1/balance", h.gateway.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
    assert_eq!(body["error"]["message"], "Request requires Authorization header");
    assert_eq!(h.teapot.calls(), 0);
}

#[tokio::test]
async fn ungranted_permissions_are_rejected_until_granted() {
    let h = spawn_gateway().await;
    let client = reqwest::Client::new();
    let mut p = PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]);
    let credential = sign(&p);

    let res = client
        .delete(format!("{}/v1/customers/cus_fakecustid", h.gateway.base_url))
        .bearer_auth(&credential)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_type(res).await, "permission_error");

    let res = client
        .get(format!("{}/v1/transfers", h.gateway.base_url))
        .bearer_auth(&credential)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_type(res).await, "permission_error");
    assert_eq!(h.teapot.calls(), 0);

    // Grant read on transfers now
    p.set_access(AccessLevel::Read, &[ResourceKind::Transfers]);
    let res = client
        .get(format!("{}/v1/transfers", h.gateway.base_url))
        .bearer_auth(sign(&p))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(h.teapot.calls(), 1);
}

#[tokio::test]
async fn expansion_requires_access_to_all_resources() {
    let h = spawn_gateway().await;
    let client = reqwest::Client::new();
    let mut p = PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Charges]);
    let url = format!("{}/v1/charges/ch_example_id", h.gateway.base_url);

    // Without the expand it works
    let res = client.get(&url).bearer_auth(sign(&p)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(h.teapot.calls(), 1);

    // With the expand it fails
    let res = client
        .get(&url)
        .query(&[("expand[]", "customer")])
        .bearer_auth(sign(&p))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_type(res).await, "permission_error");
    assert_eq!(h.teapot.calls(), 1);

    // Granting the wildcard makes it work again, and the query is passed through
    p.set_access(AccessLevel::Read, &[ResourceKind::All]);
    let res = client
        .get(&url)
        .query(&[("expand[]", "customer")])
        .bearer_auth(sign(&p))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(h.teapot.calls(), 2);
    assert_eq!(h.teapot.last().path_and_query, "/v1/charges/ch_example_id?expand%5B%5D=customer");
}

#[tokio::test]
async fn write_requests_forward_their_body() {
    let h = spawn_gateway().await;
    let credential = sign(&PermissionSet::new().with_access(AccessLevel::Write, &[ResourceKind::Charges]));

    let res = reqwest::Client::new()
        .post(format!("{}/v1/charges", h.gateway.base_url))
        .bearer_auth(&credential)
        .header("content-type", "application/x-www-form-urlencoded")
        .body("amount=2000&currency=usd")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
    let seen = h.teapot.last();
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.body, "amount=2000&currency=usd");
}

#[tokio::test]
async fn sub_resource_routes_need_their_own_grant() {
    let h = spawn_gateway().await;
    let client = reqwest::Client::new();
    let customers_only = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]));

    let res = client
        .get(format!("{}/v1/customers/cus_1/sources", h.gateway.base_url))
        .bearer_auth(&customers_only)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let sources = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Sources]));
    let res = client
        .get(format!("{}/v1/customers/cus_1/sources", h.gateway.base_url))
        .bearer_auth(&sources)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
}

/// Sends `target` verbatim; an HTTP client would normalize it first.
async fn raw_get(base_url: &str, target: &str, token: &str) -> (u16, String) {
    let addr = base_url.trim_start_matches("http://");
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {target} HTTP/1.1\r\nHost: {addr}\r\nAuthorization: Bearer {token}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let status = response.split_whitespace().nth(1).unwrap().parse().unwrap();
    (status, response)
}

#[tokio::test]
async fn dot_segments_cannot_reach_other_resources() {
    let h = spawn_gateway().await;
    let charges_only = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Charges]));

    for target in [
        "/v1/charges/../customers",
        "/v1/charges/%2e%2e/customers",
        "/v1/charges/%2E%2e/customers",
        "/v1/charges/./../customers",
    ] {
        let (status, response) = raw_get(&h.gateway.base_url, target, &charges_only).await;
        assert_eq!(status, 403, "{target}");
        assert!(response.contains("invalid_request_error"), "{target}");
    }
    assert_eq!(h.teapot.calls(), 0);

    // The same credential still works on the path it was granted for.
    let (status, _) = raw_get(&h.gateway.base_url, "/v1/charges/ch_1", &charges_only).await;
    assert_eq!(status, 418);
    assert_eq!(h.teapot.last().path_and_query, "/v1/charges/ch_1");
}

#[tokio::test]
async fn empty_path_segments_are_rejected() {
    let h = spawn_gateway().await;
    let customers = sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]));

    let res = reqwest::Client::new()
        .get(format!("{}/v1/customers//sources", h.gateway.base_url))
        .bearer_auth(&customers)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_type(res).await, "invalid_request_error");
    assert_eq!(h.teapot.calls(), 0);
}

#[tokio::test]
async fn health_is_served_locally() {
    let h = spawn_gateway().await;

    let res = reqwest::Client::new()
        .get(format!("{}/health", h.gateway.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(h.teapot.calls(), 0);
}
