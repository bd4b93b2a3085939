//! End-to-end scenarios against the assembled router
//!
//! The memory store and the simulated upstream stand in for Postgres and the
//! WhatsApp transport; requests are driven through `tower::ServiceExt`.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wagate::backend::MemoryStore;
use wagate::upstream::sim::{SimSocket, SimUpstream};
use wagate::{EngineConfig, EventBus, Store, Supervisor};
use wagate_server::{build_router, AppState};

const SECRET: &str = "test-secret";

struct TestApp {
  router: Router,
  store: Arc<MemoryStore>,
  upstream: Arc<SimUpstream>,
  supervisor: Supervisor,
}

fn test_app() -> TestApp {
  let store = Arc::new(MemoryStore::new());
  let upstream = Arc::new(SimUpstream::new());
  let bus = Arc::new(EventBus::new());
  let supervisor = Supervisor::new(
    store.clone(),
    upstream.clone(),
    bus.clone(),
    EngineConfig::default(),
  )
  .unwrap();
  let state = AppState {
    registry: supervisor.registry(),
    supervisor: supervisor.clone(),
    store: store.clone(),
    bus,
    secret_key: SECRET.to_string(),
    socket_enabled: false,
  };
  TestApp {
    router: build_router(state, "/api/v1"),
    store,
    upstream,
    supervisor,
  }
}

impl TestApp {
  async fn registered_key(&self) -> String {
    self
      .supervisor
      .registry()
      .generate(Some("scenario tenant"))
      .await
      .unwrap()
      .key
  }

  async fn request(
    &self,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for &(name, value) in headers {
      builder = builder.header(name, value);
    }
    let request = match body {
      Some(value) => builder
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    };
    let response = self.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
  }

  async fn wait_socket(&self, n: usize) -> Arc<SimSocket> {
    for _ in 0..1000 {
      if self.upstream.socket_count() >= n {
        return self.upstream.last_socket().unwrap();
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("socket {n} never appeared");
  }

  /// Drive qr pairing and the open event through the HTTP surface
  async fn pair_and_open(&self, api_key: &str) -> Arc<SimSocket> {
    let router = self.router.clone();
    let uri = format!("/api/v1/whatsapp/sessions/{api_key}/qr");
    let qr_task = tokio::spawn(async move {
      let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json!({"displayName": "Bot"}).to_string()))
        .unwrap();
      router.oneshot(request).await.unwrap()
    });

    let socket = self.wait_socket(self.upstream.socket_count() + 1).await;
    socket.emit_qr("scenario-qr").await;
    let response = qr_task.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    socket.emit_open("628123456789@s.whatsapp.net").await;
    self.wait_connected(api_key).await;
    socket
  }

  async fn wait_connected(&self, api_key: &str) {
    let uri = format!("/api/v1/whatsapp/sessions/{api_key}/status");
    for _ in 0..1000 {
      let (status, body) = self.request(Method::GET, &uri, &[], None).await;
      if status == StatusCode::OK && body["data"]["connected"] == true {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reported connected");
  }
}

/// S1: qr pairing followed by the open event
#[tokio::test]
async fn scenario_qr_then_connect() {
  let app = test_app();
  let key = app.registered_key().await;

  let router = app.router.clone();
  let uri = format!("/api/v1/whatsapp/sessions/{key}/qr");
  let qr_task = tokio::spawn(async move {
    let request = Request::builder()
      .method(Method::POST)
      .uri(uri)
      .header("content-type", "application/json")
      .body(Body::from(json!({"displayName": "Bot"}).to_string()))
      .unwrap();
    router.oneshot(request).await.unwrap()
  });

  let socket = app.wait_socket(1).await;
  socket.emit_qr("<qr>").await;

  let response = qr_task.await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let body: Value = serde_json::from_slice(&bytes).unwrap();
  assert_eq!(body["status"], "success");
  assert_eq!(body["data"]["apiKey"], key);
  assert_eq!(body["data"]["status"], "QR");
  assert_eq!(body["data"]["qr"], "<qr>");

  socket.emit_open("628123456789@s.whatsapp.net").await;
  app.wait_connected(&key).await;

  let (status, body) = app
    .request(
      Method::GET,
      &format!("/api/v1/whatsapp/sessions/{key}/status"),
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "success");
  assert_eq!(body["data"]["status"], "CONNECTED");
  assert_eq!(body["data"]["connected"], true);
}

/// S2: logout is terminal and a follow-up qr request opens no socket
#[tokio::test]
async fn scenario_logout_idempotence() {
  let app = test_app();
  let key = app.registered_key().await;
  app.pair_and_open(&key).await;

  let (status, body) = app
    .request(
      Method::POST,
      &format!("/api/v1/whatsapp/sessions/{key}/logout"),
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"status": "success", "message": "Logged out"}));

  let sockets_before = app.upstream.socket_count();
  let (status, body) = app
    .request(
      Method::POST,
      &format!("/api/v1/whatsapp/sessions/{key}/qr"),
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["data"]["status"], "LOGGED_OUT");
  assert!(body["data"].get("qr").is_none());
  assert_eq!(app.upstream.socket_count(), sockets_before);
}

/// S3: logout for an unknown key
#[tokio::test]
async fn scenario_missing_session() {
  let app = test_app();
  let (status, body) = app
    .request(
      Method::POST,
      "/api/v1/whatsapp/sessions/kx/logout",
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(
    body,
    json!({"status": "error", "message": "Whatsapp session not found"})
  );
}

/// S4: the lock is owned by another instance
#[tokio::test]
async fn scenario_lock_contention() {
  let app = test_app();
  let key = app.registered_key().await;
  app.store.upsert_session(&key, None).await.unwrap();
  assert!(app
    .store
    .acquire_lock(&key, "instance-b-9001", Duration::from_secs(300))
    .await
    .unwrap());

  let (status, body) = app
    .request(
      Method::POST,
      &format!("/api/v1/whatsapp/message/{key}/send"),
      &[],
      Some(json!({"to": "628123456789", "text": "hi"})),
    )
    .await;
  assert_eq!(status, StatusCode::LOCKED);
  assert_eq!(body["status"], "error");
  let message = body["message"].as_str().unwrap();
  assert!(message.contains("handled by another instance"), "{message}");
  assert!(message.contains("instance-b-9001"), "{message}");
}

/// S5: MSISDN normalisation and body validation
#[tokio::test]
async fn scenario_send_validation() {
  let app = test_app();
  let key = app.registered_key().await;
  let socket = app.pair_and_open(&key).await;

  let (status, body) = app
    .request(
      Method::POST,
      &format!("/api/v1/whatsapp/message/{key}/send"),
      &[],
      Some(json!({"to": "0812-345-6789", "text": "hi"})),
    )
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "success");
  assert!(body["data"]["messageId"].is_string());
  let sent = socket.sent_messages();
  assert_eq!(sent.last().unwrap().0, "628123456789@s.whatsapp.net");

  let (status, body) = app
    .request(
      Method::POST,
      &format!("/api/v1/whatsapp/message/{key}/send"),
      &[],
      Some(json!({"to": "abc", "text": "hi"})),
    )
    .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(
    body["message"],
    "Invalid 'to' (use digits, 8-15, with country code)"
  );

  let (status, body) = app
    .request(
      Method::POST,
      &format!("/api/v1/whatsapp/message/{key}/send"),
      &[],
      Some(json!({"to": "628123456789", "text": ""})),
    )
    .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["message"], "Invalid 'text' (1-1000 chars)");
}

/// S6: the admin guard rejects requests without the shared secret
#[tokio::test]
async fn scenario_admin_guard() {
  let app = test_app();

  let (status, body) = app.request(Method::GET, "/api/v1/api-keys", &[], None).await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(body, json!({"status": "error", "message": "Invalid secret key"}));

  let (status, _) = app
    .request(
      Method::GET,
      "/api/v1/api-keys",
      &[("x-secret-key", "wrong")],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::FORBIDDEN);

  let (status, body) = app
    .request(
      Method::GET,
      "/api/v1/api-keys",
      &[("x-secret-key", SECRET)],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "success");
  assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_key_lifecycle() {
  let app = test_app();

  let (status, body) = app
    .request(
      Method::POST,
      "/api/v1/api-keys",
      &[("x-secret-key", SECRET)],
      Some(json!({"label": "tenant one"})),
    )
    .await;
  assert_eq!(status, StatusCode::CREATED);
  let key = body["data"]["key"].as_str().unwrap().to_string();
  assert!(key.starts_with("wg_"));
  assert_eq!(body["data"]["label"], "tenant one");
  assert_eq!(body["data"]["isActive"], true);

  let (status, _) = app
    .request(
      Method::DELETE,
      &format!("/api/v1/api-keys/{key}"),
      &[("x-secret-key", SECRET)],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::OK);

  // Deactivated and missing keys surface the same error
  let (status, body) = app
    .request(
      Method::GET,
      &format!("/api/v1/whatsapp/sessions/{key}/status"),
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(body["message"], "API key not registered");
  let (status, body) = app
    .request(
      Method::GET,
      "/api/v1/whatsapp/sessions/wg_missing/status",
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::FORBIDDEN);
  assert_eq!(body["message"], "API key not registered");

  let (status, body) = app
    .request(
      Method::DELETE,
      "/api/v1/api-keys/wg_missing",
      &[("x-secret-key", SECRET)],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["message"], "API key not found");
}

#[tokio::test]
async fn event_stream_headers_and_cors() {
  let app = test_app();
  let key = app.registered_key().await;
  let uri = format!("/api/v1/whatsapp/sessions/{key}/stream");

  let request = Request::builder()
    .method(Method::GET)
    .uri(&uri)
    .header("origin", "https://ops.example")
    .body(Body::empty())
    .unwrap();
  let response = app.router.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let headers = response.headers();
  assert_eq!(
    headers.get("content-type").unwrap(),
    "text/event-stream; charset=utf-8"
  );
  assert_eq!(headers.get("cache-control").unwrap(), "no-cache, no-transform");
  assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
  assert_eq!(
    headers.get("access-control-allow-origin").unwrap(),
    "https://ops.example"
  );
  assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");

  // Without an origin the stream is open to any caller, credentials excluded
  let request = Request::builder()
    .method(Method::GET)
    .uri(&uri)
    .body(Body::empty())
    .unwrap();
  let response = app.router.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    response.headers().get("access-control-allow-origin").unwrap(),
    "*"
  );
  assert!(response
    .headers()
    .get("access-control-allow-credentials")
    .is_none());

  // Unregistered keys cannot attach a stream
  let request = Request::builder()
    .method(Method::GET)
    .uri("/api/v1/whatsapp/sessions/wg_missing/stream")
    .body(Body::empty())
    .unwrap();
  let response = app.router.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sessions_listing_includes_rows() {
  let app = test_app();
  let key = app.registered_key().await;
  app.store.upsert_session(&key, Some("Bot")).await.unwrap();

  let (status, body) = app
    .request(Method::GET, "/api/v1/whatsapp/sessions", &[], None)
    .await;
  assert_eq!(status, StatusCode::OK);
  let sessions = body["data"].as_array().unwrap();
  assert_eq!(sessions.len(), 1);
  assert_eq!(sessions[0]["apiKey"], key);
  assert_eq!(sessions[0]["displayName"], "Bot");
  assert_eq!(sessions[0]["status"], "DISCONNECTED");
}

#[tokio::test]
async fn websocket_mirror_is_gated_by_socket_enabled() {
  // Disabled: the route does not exist
  let app = test_app();
  let key = app.registered_key().await;
  let (status, _) = app
    .request(
      Method::GET,
      &format!("/api/v1/whatsapp/sessions/{key}/ws"),
      &[],
      None,
    )
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  // Enabled: the route exists and rejects a plain GET without upgrade headers
  let store = Arc::new(MemoryStore::new());
  let upstream = Arc::new(SimUpstream::new());
  let bus = Arc::new(EventBus::new());
  let supervisor = Supervisor::new(
    store.clone(),
    upstream,
    bus.clone(),
    EngineConfig::default(),
  )
  .unwrap();
  let key = supervisor.registry().generate(None).await.unwrap().key;
  let state = AppState {
    registry: supervisor.registry(),
    supervisor,
    store,
    bus,
    secret_key: SECRET.to_string(),
    socket_enabled: true,
  };
  let router = build_router(state, "/api/v1");
  let request = Request::builder()
    .method(Method::GET)
    .uri(format!("/api/v1/whatsapp/sessions/{key}/ws"))
    .body(Body::empty())
    .unwrap();
  let response = router.oneshot(request).await.unwrap();
  assert_ne!(response.status(), StatusCode::NOT_FOUND);
  assert!(response.status().is_client_error());
}
