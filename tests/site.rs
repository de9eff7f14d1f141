use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    body::{Body, Bytes, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
    routing::{get, post},
};
use comment_board::{
    config::{ProxyConfig, SiteConfig},
    routes::proxy_router,
    site::site_router,
    state::{ProxyState, SiteState},
    store::{
        COMMENTS_KEY, MemoryStore, ObjectStore, Precondition, StoreBackend, StoreError,
        StoredObject,
    },
    verify::{ChallengeVerifier, TurnstileVerifier, Verification, VerifyError},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

const SECRET: &str = "shared-secret";

/// Counts reads so tests can prove the store was never touched.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        precondition: Precondition,
    ) -> Result<String, StoreError> {
        self.inner.put(key, body, precondition).await
    }
}

struct FakeVerifier {
    pass: bool,
    calls: AtomicUsize,
    last_ip: Mutex<Option<String>>,
}

impl FakeVerifier {
    fn new(pass: bool) -> Arc<Self> {
        Arc::new(Self {
            pass,
            calls: AtomicUsize::new(0),
            last_ip: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ChallengeVerifier for FakeVerifier {
    async fn verify(
        &self,
        _token: &str,
        remote_ip: Option<&str>,
    ) -> Result<Verification, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_ip.lock().unwrap() = remote_ip.map(str::to_string);

        Ok(Verification {
            success: self.pass,
            error_codes: if self.pass {
                Vec::new()
            } else {
                vec!["invalid-input-response".to_string()]
            },
            ..Default::default()
        })
    }
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    address
}

/// An address nothing listens on.
async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn spawn_proxy() -> (SocketAddr, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::default());
    let config = ProxyConfig {
        port: 0,
        auth_key: SECRET.to_string(),
        store_backend: StoreBackend::Memory,
        data_dir: PathBuf::from("unused"),
        store_timeout: Duration::from_secs(2),
        write_attempts: 5,
        allow_origin: "*".to_string(),
    };
    let address = spawn(proxy_router(ProxyState::with_store(config, store.clone()))).await;
    (address, store)
}

fn site_config(proxy: SocketAddr) -> SiteConfig {
    SiteConfig {
        port: 0,
        proxy_url: format!("http://{proxy}/comments.json"),
        auth_key: SECRET.to_string(),
        public_read_url: None,
        turnstile_secret: "turnstile-secret".to_string(),
        verify_url: "http://127.0.0.1:9/unused".to_string(),
        request_timeout: Duration::from_secs(2),
    }
}

fn site(config: SiteConfig, verifier: Arc<dyn ChallengeVerifier>) -> Router {
    site_router(SiteState::with_verifier(config, verifier).unwrap())
}

fn form(path: &str, body: &str) -> Request<Body> {
    Request::post(path)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn load(app: &Router) -> Vec<Value> {
    let (status, body) = send(app, Request::get("/comments").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    body["comments"].as_array().unwrap().clone()
}

#[tokio::test]
async fn create_then_delete_through_the_proxy() {
    let (proxy, _store) = spawn_proxy().await;
    let app = site(site_config(proxy), FakeVerifier::new(true));
    assert!(load(&app).await.is_empty());

    let (status, body) = send(&app, form("/comments", "name=Alice&comment=Hi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let comments = load(&app).await;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["name"], "Alice");
    assert_eq!(comments[0]["comment"], "Hi");
    let timestamp = comments[0]["timestamp"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        form("/comments", &format!("action=delete&timestamp={timestamp}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(load(&app).await.is_empty());
}

#[tokio::test]
async fn accepted_fields_are_stored_as_submitted() {
    let (proxy, _store) = spawn_proxy().await;
    let app = site(site_config(proxy), FakeVerifier::new(true));

    let (status, _) = send(&app, form("/comments", "name=+Alice+&comment=Hi%0A")).await;
    assert_eq!(status, StatusCode::OK);

    let comments = load(&app).await;
    assert_eq!(comments[0]["name"], " Alice ");
    assert_eq!(comments[0]["comment"], "Hi\n");
}

#[tokio::test]
async fn empty_fields_never_reach_the_store() {
    let (proxy, store) = spawn_proxy().await;
    let app = site(site_config(proxy), FakeVerifier::new(true));

    let (status, body) = send(&app, form("/comments", "name=&comment=Hi")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({"success": false, "errors": {"name": "Name is required"}})
    );

    let (status, body) = send(&app, form("/comments", "name=+&comment=")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["name"], "Name is required");
    assert_eq!(body["errors"]["comment"], "Comment is required");

    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    assert!(store.inner.get(COMMENTS_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_requires_a_timestamp() {
    let (proxy, store) = spawn_proxy().await;
    let app = site(site_config(proxy), FakeVerifier::new(true));

    let (status, body) = send(&app, form("/comments", "action=delete")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["timestamp"], "Timestamp is required");
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let (proxy, _store) = spawn_proxy().await;
    let app = site(site_config(proxy), FakeVerifier::new(true));

    let (status, body) = send(&app, form("/comments", "action=edit&name=a&comment=b")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"]["action"], "Unsupported action: edit");
}

// A dead proxy blanks the list but fails writes loudly.
#[tokio::test]
async fn unreachable_proxy() {
    let app = site(site_config(dead_address().await), FakeVerifier::new(true));

    assert!(load(&app).await.is_empty());

    let (status, body) = send(&app, form("/comments", "name=Alice&comment=Hi")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        body,
        json!({"success": false, "errors": {"comment": "Failed to save comment"}})
    );
}

#[tokio::test]
async fn wrong_secret_reads_empty_and_cannot_write() {
    let (proxy, store) = spawn_proxy().await;
    let mut config = site_config(proxy);
    config.auth_key = "stale".to_string();
    let app = site(config, FakeVerifier::new(true));

    assert!(load(&app).await.is_empty());
    let (status, _) = send(&app, form("/comments", "name=Alice&comment=Hi")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn passing_challenge_reveals_comments() {
    let (proxy, store) = spawn_proxy().await;
    store
        .inner
        .put(
            COMMENTS_KEY,
            Bytes::from_static(
                br#"[{"name":"Bob","comment":"Yo","timestamp":"2025-01-01T00:00:00.000Z"}]"#,
            ),
            Precondition::Absent,
        )
        .await
        .unwrap();
    let verifier = FakeVerifier::new(true);
    let app = site(site_config(proxy), verifier.clone());

    let request = Request::post("/verify")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("cf-connecting-ip", "203.0.113.7")
        .body(Body::from("cf-turnstile-response=token"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["comments"][0]["name"], "Bob");
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(verifier.last_ip.lock().unwrap().as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn failing_challenge_keeps_the_gate_shut() {
    let (proxy, store) = spawn_proxy().await;
    let app = site(site_config(proxy), FakeVerifier::new(false));

    let (status, body) = send(&app, form("/verify", "cf-turnstile-response=bad")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({"success": false, "message": "invalid-input-response"})
    );
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_token_skips_the_verifier() {
    let (proxy, _store) = spawn_proxy().await;
    let verifier = FakeVerifier::new(true);
    let app = site(site_config(proxy), verifier.clone());

    let (status, body) = send(&app, form("/verify", "")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Missing verification token");
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn public_read_url_replaces_proxy_reads() {
    let public = spawn(Router::new().route(
        "/comments.json",
        get(|| async { Json(json!([{"name":"Pub","comment":"lic","timestamp":"t1"}])) }),
    ))
    .await;

    let mut config = site_config(dead_address().await);
    config.public_read_url = Some(format!("http://{public}/comments.json"));
    let app = site(config, FakeVerifier::new(true));

    let comments = load(&app).await;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["name"], "Pub");
}

async fn fake_siteverify(Form(fields): Form<HashMap<String, String>>) -> Json<Value> {
    let authentic = fields.get("secret").map(String::as_str) == Some("turnstile-secret");
    let good_token = fields.get("response").map(String::as_str) == Some("good-token");
    let has_ip = fields.get("remoteip").map(String::as_str) == Some("198.51.100.4");

    if authentic && good_token && has_ip {
        Json(json!({"success": true, "hostname": "example.com"}))
    } else {
        Json(json!({"success": false, "error-codes": ["invalid-input-response"]}))
    }
}

#[tokio::test]
async fn turnstile_verifier_posts_secret_token_and_ip() {
    let service = spawn(Router::new().route("/siteverify", post(fake_siteverify))).await;
    let verifier = TurnstileVerifier::new(
        format!("http://{service}/siteverify"),
        "turnstile-secret".to_string(),
        Duration::from_secs(2),
    )
    .unwrap();

    let passed = verifier
        .verify("good-token", Some("198.51.100.4"))
        .await
        .unwrap();
    assert!(passed.success);
    assert_eq!(passed.hostname.as_deref(), Some("example.com"));

    let rejected = verifier.verify("bad-token", Some("198.51.100.4")).await.unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.failure_message(), "invalid-input-response");
}

#[tokio::test]
async fn turnstile_outage_is_an_error() {
    let verifier = TurnstileVerifier::new(
        format!("http://{}/siteverify", dead_address().await),
        "turnstile-secret".to_string(),
        Duration::from_secs(2),
    )
    .unwrap();

    assert!(verifier.verify("good-token", None).await.is_err());
}
