//! Integration tests for the middleware pipeline
//!
//! Ordering, snapshot isolation, short-circuiting and response rewriting,
//! exercised through a real client against wiremock.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gpucloud_client::middleware::{
    AuthMiddleware, ErrorClassificationMiddleware, RequestContext, RequestHandler,
    RequestMiddleware, ResponseContext, ResponseHandler, ResponseMiddleware,
};
use gpucloud_client::{ApiError, ClientConfig, GpuCloudClient};
use reqwest::StatusCode;
use serde_json::{json, Value};
use support::{config, header, mount_token, requests_to, LogCapture, CLIENT_SECRET};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Journal = Arc<Mutex<Vec<String>>>;

/// Records entry and exit of every handler it wraps.
struct Marker {
    name: &'static str,
    journal: Journal,
}

impl Marker {
    fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self { name, journal: Arc::clone(journal) })
    }
}

struct MarkerHandler<N: ?Sized> {
    name: &'static str,
    journal: Journal,
    next: Arc<N>,
}

impl<N: ?Sized> MarkerHandler<N> {
    fn record(&self, event: &str) {
        self.journal.lock().unwrap().push(format!("{}:{event}", self.name));
    }
}

impl RequestMiddleware for Marker {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(MarkerHandler { name: self.name, journal: Arc::clone(&self.journal), next })
    }
}

impl ResponseMiddleware for Marker {
    fn wrap(&self, next: Arc<dyn ResponseHandler>) -> Arc<dyn ResponseHandler> {
        Arc::new(MarkerHandler { name: self.name, journal: Arc::clone(&self.journal), next })
    }
}

#[async_trait]
impl RequestHandler for MarkerHandler<dyn RequestHandler> {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        self.record("enter");
        let result = self.next.handle(ctx).await;
        self.record("exit");
        result
    }
}

#[async_trait]
impl ResponseHandler for MarkerHandler<dyn ResponseHandler> {
    async fn handle(&self, ctx: &mut ResponseContext) -> Result<(), ApiError> {
        self.record("enter");
        let result = self.next.handle(ctx).await;
        self.record("exit");
        result
    }
}

/// Rejects every request without calling the rest of the chain.
struct Gate;

struct GateHandler;

impl RequestMiddleware for Gate {
    fn wrap(&self, _next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(GateHandler)
    }
}

#[async_trait]
impl RequestHandler for GateHandler {
    async fn handle(&self, _ctx: &mut RequestContext) -> Result<(), ApiError> {
        Err(ApiError::Middleware("region is read-only".into()))
    }
}

/// Captures the `Authorization` header seen at its position in the chain.
struct HeaderSpy {
    seen: Arc<Mutex<Option<String>>>,
}

struct HeaderSpyHandler {
    seen: Arc<Mutex<Option<String>>>,
    next: Arc<dyn RequestHandler>,
}

impl RequestMiddleware for HeaderSpy {
    fn wrap(&self, next: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
        Arc::new(HeaderSpyHandler { seen: Arc::clone(&self.seen), next })
    }
}

#[async_trait]
impl RequestHandler for HeaderSpyHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        let auth = ctx
            .headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        *self.seen.lock().unwrap() = auth;
        self.next.handle(ctx).await
    }
}

/// Treats 404 answers as an empty list.
struct MissingAsEmpty;

struct MissingAsEmptyHandler {
    next: Arc<dyn ResponseHandler>,
}

impl ResponseMiddleware for MissingAsEmpty {
    fn wrap(&self, next: Arc<dyn ResponseHandler>) -> Arc<dyn ResponseHandler> {
        Arc::new(MissingAsEmptyHandler { next })
    }
}

#[async_trait]
impl ResponseHandler for MissingAsEmptyHandler {
    async fn handle(&self, ctx: &mut ResponseContext) -> Result<(), ApiError> {
        self.next.handle(ctx).await?;
        if ctx.status == StatusCode::NOT_FOUND {
            ctx.status = StatusCode::OK;
            ctx.body = b"[]".to_vec();
            ctx.error = None;
        }
        Ok(())
    }
}

async fn mount_ok(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(server)
        .await;
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Validates that the first registered middleware is outermost.
///
/// # Test Steps
/// 1. Register markers A then B on both sides
/// 2. Dispatch one request
/// 3. Verify A wraps B on the request side and on the response side
#[tokio::test]
async fn test_first_registered_is_outermost() {
    let server = MockServer::start().await;
    mount_ok(&server, "/ping").await;

    let requests = journal();
    let responses = journal();
    let request_side: Vec<Arc<dyn RequestMiddleware>> =
        vec![Marker::new("A", &requests), Marker::new("B", &requests)];
    let response_side: Vec<Arc<dyn ResponseMiddleware>> =
        vec![Marker::new("A", &responses), Marker::new("B", &responses)];
    let client = GpuCloudClient::builder(ClientConfig::new(server.uri()).with_bearer_token("t"))
        .request_middleware(request_side)
        .response_middleware(response_side)
        .build()
        .unwrap();

    client.get::<Value>("/ping").await.unwrap();

    let expected = ["A:enter", "B:enter", "B:exit", "A:exit"];
    assert_eq!(entries(&requests), expected);
    assert_eq!(entries(&responses), expected);
}

/// Validates that middleware added later runs inside the defaults.
#[tokio::test]
async fn test_added_middleware_sees_authorization() {
    let server = MockServer::start().await;
    mount_token(&server, "t1").await;
    mount_ok(&server, "/ping").await;

    let client = GpuCloudClient::new(config(&server)).unwrap();
    let seen = Arc::new(Mutex::new(None));
    client.middleware().add_request(Arc::new(HeaderSpy { seen: Arc::clone(&seen) }));
    assert_eq!(client.middleware().request_count(), 4);

    client.get::<Value>("/ping").await.unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("Bearer t1"));
}

/// Validates that an in-flight call keeps the chain it started with.
///
/// # Test Steps
/// 1. Start a slow call through the default chain
/// 2. Clear the registry while the call is at the server
/// 3. Verify the call completes with authentication
/// 4. Verify a later call runs with no middleware at all
#[tokio::test]
async fn test_registry_changes_do_not_affect_in_flight_calls() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": true}))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let client =
        GpuCloudClient::new(ClientConfig::new(server.uri()).with_bearer_token("static-token"))
            .unwrap();
    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.get::<Value>("/slow").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.middleware().clear();
    assert_eq!(client.middleware().request_count(), 0);

    in_flight.await.unwrap().unwrap();
    client.get::<Value>("/slow").await.unwrap();

    let requests = requests_to(&server, "/slow").await;
    assert_eq!(requests.len(), 2);
    assert_eq!(header(&requests[0], "authorization").as_deref(), Some("Bearer static-token"));
    assert!(header(&requests[1], "authorization").is_none());
    assert!(header(&requests[1], "user-agent").is_none());
}

/// Validates that a middleware can fail a call before the network.
#[tokio::test]
async fn test_short_circuit_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(path("/instances"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let journal = journal();
    let layers: Vec<Arc<dyn RequestMiddleware>> =
        vec![Marker::new("outer", &journal), Arc::new(Gate), Arc::new(AuthMiddleware)];
    let client = GpuCloudClient::builder(ClientConfig::new(server.uri()).with_bearer_token("t"))
        .request_middleware(layers)
        .build()
        .unwrap();

    let err =
        client.post::<_, Value>("/instances", &json!({"gpu_type": "a100"})).await.unwrap_err();

    assert!(matches!(&err, ApiError::Middleware(message) if message == "region is read-only"));
    assert_eq!(entries(&journal), ["outer:enter", "outer:exit"]);
}

/// Validates that response middleware can absorb a classified error.
#[tokio::test]
async fn test_response_middleware_rewrites_error() {
    let server = MockServer::start().await;
    Mock::given(path("/volumes"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "no volumes"})))
        .mount(&server)
        .await;

    let config = ClientConfig::new(server.uri()).with_bearer_token("t");
    let plain = GpuCloudClient::new(config.clone()).unwrap();
    let err = plain.get::<Vec<Value>>("/volumes").await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));

    let layers: Vec<Arc<dyn ResponseMiddleware>> =
        vec![Arc::new(MissingAsEmpty), Arc::new(ErrorClassificationMiddleware)];
    let lenient = GpuCloudClient::builder(config).response_middleware(layers).build()
        .unwrap();
    let volumes: Vec<Value> = lenient.get("/volumes").await.unwrap();
    assert!(volumes.is_empty());
}

/// Validates that non-2xx answers fail even with no response middleware.
#[tokio::test]
async fn test_empty_response_chain_still_reports_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/instances"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream crashed"))
        .mount(&server)
        .await;

    let client = GpuCloudClient::builder(ClientConfig::new(server.uri()).with_bearer_token("t"))
        .response_middleware(Vec::new())
        .build()
        .unwrap();
    let err = client.get::<Value>("/instances").await.unwrap_err();

    match err {
        ApiError::Api(classified) => {
            assert_eq!(classified.status_code, 500);
            assert_eq!(classified.message, "upstream crashed");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

/// Validates verbose logging output and secret hygiene.
///
/// # Test Steps
/// 1. Install a capturing subscriber for this test
/// 2. Dispatch through a verbose client
/// 3. Verify request/response events are present and no secret is printed
#[tokio::test]
async fn test_verbose_logging_omits_secrets() {
    let server = MockServer::start().await;
    mount_token(&server, "super-secret-access-token").await;
    mount_ok(&server, "/ping").await;

    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_env_filter(EnvFilter::new("gpucloud_client=debug"))
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let client = GpuCloudClient::new(config(&server).with_verbose(true)).unwrap();
    client.get::<Value>("/ping").await.unwrap();

    let logs = capture.contents();
    assert!(logs.contains("sending request"), "{logs}");
    assert!(logs.contains("request completed"), "{logs}");
    assert!(logs.contains("response received"), "{logs}");
    assert!(!logs.contains("super-secret-access-token"), "{logs}");
    assert!(!logs.contains(CLIENT_SECRET), "{logs}");
}
