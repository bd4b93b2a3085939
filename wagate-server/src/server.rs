//! Router assembly, admin auth middleware, the SSE event stream and the
//! optional WebSocket mirror

use crate::error::{Error, Result};
use crate::handler;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::header::{self, HeaderValue};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use wagate::base::Store;
use wagate::session::{ConnectionInfo, SessionStatus};
use wagate::{EventBus, KeyRegistry, StreamFrame, Supervisor};

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
  pub supervisor: Supervisor,
  pub registry: KeyRegistry,
  pub store: Arc<dyn Store>,
  pub bus: Arc<EventBus>,
  pub secret_key: String,
  pub socket_enabled: bool,
}

/// Build the full router under the given prefix
pub fn build_router(state: AppState, prefix: &str) -> Router {
  let admin = Router::new()
    .route("/api-keys", get(handler::list_keys).post(handler::create_key))
    .route("/api-keys/:key", delete(handler::deactivate_key))
    .route_layer(middleware::from_fn_with_state(
      state.clone(),
      require_secret,
    ));

  let whatsapp = Router::new()
    .route("/whatsapp/sessions", get(handler::list_sessions))
    .route("/whatsapp/sessions/:api_key/qr", post(handler::get_qr))
    .route("/whatsapp/sessions/:api_key/logout", post(handler::logout))
    .route(
      "/whatsapp/sessions/:api_key/status",
      get(handler::connection_status),
    )
    .route("/whatsapp/message/:api_key/send", post(handler::send_text));

  // The stream endpoints do origin-reflecting CORS themselves so credentialed
  // EventSource clients work; keep them outside the permissive layer
  let mut streams = Router::new().route("/whatsapp/sessions/:api_key/stream", get(stream));
  if state.socket_enabled {
    streams = streams.route("/whatsapp/sessions/:api_key/ws", get(websocket_mirror));
  }

  Router::new()
    .nest(
      prefix,
      admin
        .merge(whatsapp)
        .layer(CorsLayer::permissive())
        .merge(streams),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Admin guard: the `x-secret-key` header must match the configured secret
async fn require_secret(State(state): State<AppState>, req: Request, next: Next) -> Result<Response> {
  let provided = req
    .headers()
    .get("x-secret-key")
    .and_then(|value| value.to_str().ok());
  if provided != Some(state.secret_key.as_str()) {
    return Err(Error::InvalidSecretKey);
  }
  Ok(next.run(req).await)
}

/// `GET /whatsapp/sessions/:apiKey/stream`
///
/// Upgrades to `text/event-stream`. New subscribers get a comment frame to
/// flush headers, the current status and the last known qr, then live events.
/// Heartbeat comments are produced by the engine's heartbeat component.
async fn stream(
  State(state): State<AppState>,
  Path(api_key): Path<String>,
  headers: HeaderMap,
) -> Result<Response> {
  let rx = subscribe(&state, &api_key).await?;
  let stream = ReceiverStream::new(rx).map(|frame| Ok::<Event, Infallible>(frame_to_event(frame)));

  let mut response = Sse::new(stream).into_response();
  let response_headers = response.headers_mut();
  response_headers.insert(
    header::CONTENT_TYPE,
    HeaderValue::from_static("text/event-stream; charset=utf-8"),
  );
  response_headers.insert(
    header::CACHE_CONTROL,
    HeaderValue::from_static("no-cache, no-transform"),
  );
  response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
  // Stops nginx-style proxies from buffering the stream
  response_headers.insert("x-accel-buffering", HeaderValue::from_static("no"));

  // Reflect a concrete origin so credentialed requests work; fall back to any
  match headers.get(header::ORIGIN) {
    Some(origin) => {
      response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
      response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
      );
    }
    None => {
      response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
      );
    }
  }
  Ok(response)
}

/// `GET /whatsapp/sessions/:apiKey/ws` (only with `SOCKET_ENABLED`)
///
/// Mirrors the event stream over a WebSocket: events become JSON text frames,
/// heartbeat comments become pings.
async fn websocket_mirror(
  State(state): State<AppState>,
  Path(api_key): Path<String>,
  ws: WebSocketUpgrade,
) -> Result<Response> {
  let rx = subscribe(&state, &api_key).await?;
  Ok(ws.on_upgrade(move |socket| mirror_frames(socket, rx)))
}

/// Register a bus subscriber seeded with the merged status and last qr
async fn subscribe(state: &AppState, api_key: &str) -> Result<mpsc::Receiver<StreamFrame>> {
  state
    .registry
    .assert_active(api_key)
    .await
    .map_err(Error::Engine)?;
  let initial = match state.supervisor.connection_status(api_key).await {
    Ok(info) => info,
    // No session row yet: a fresh subscriber still gets a status frame
    Err(_) => ConnectionInfo {
      api_key: api_key.to_string(),
      status: SessionStatus::Disconnected,
      connected: false,
    },
  };
  let last_qr = state.supervisor.current_qr(api_key).await;
  Ok(state.bus.subscribe(api_key, Some(initial), last_qr))
}

fn frame_to_event(frame: StreamFrame) -> Event {
  match frame {
    StreamFrame::Event { name, data } => Event::default().event(name).data(data.to_string()),
    StreamFrame::Comment(comment) => Event::default().comment(comment),
  }
}

async fn mirror_frames(mut socket: WebSocket, mut rx: mpsc::Receiver<StreamFrame>) {
  loop {
    tokio::select! {
      frame = rx.recv() => match frame {
        Some(StreamFrame::Event { name, data }) => {
          let payload = serde_json::json!({ "event": name, "data": data });
          if socket.send(Message::Text(payload.to_string())).await.is_err() {
            break;
          }
        }
        Some(StreamFrame::Comment(_)) => {
          if socket.send(Message::Ping(Vec::new())).await.is_err() {
            break;
          }
        }
        None => break,
      },
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
    }
  }
  debug!("websocket mirror closed");
}
