//! Route handlers
//!
//! Thin translations from HTTP requests to engine calls; every engine failure
//! is converted to the response envelope by the error type.

use crate::error::{Error, Result};
use crate::message::{
  success, success_message, CreateKeyRequest, DataEnvelope, MessageEnvelope, QrRequest, SendData,
  SendRequest,
};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use wagate::base::Store;
use wagate::session::{ApiKeyRecord, ConnectionInfo, SessionRecord};
use wagate::QrResponse;

/// `GET /api-keys` (admin)
pub async fn list_keys(
  State(state): State<AppState>,
) -> Result<Json<DataEnvelope<Vec<ApiKeyRecord>>>> {
  let keys = state.registry.list().await.map_err(Error::Engine)?;
  Ok(success(keys))
}

/// `POST /api-keys` (admin)
pub async fn create_key(
  State(state): State<AppState>,
  body: Option<Json<CreateKeyRequest>>,
) -> Result<(StatusCode, Json<DataEnvelope<ApiKeyRecord>>)> {
  let request = body.map(|Json(request)| request).unwrap_or_default();
  let record = state
    .registry
    .generate(request.label.as_deref())
    .await
    .map_err(Error::Engine)?;
  Ok((StatusCode::CREATED, success(record)))
}

/// `DELETE /api-keys/:key` (admin)
pub async fn deactivate_key(
  State(state): State<AppState>,
  Path(key): Path<String>,
) -> Result<Json<DataEnvelope<ApiKeyRecord>>> {
  let record = state
    .registry
    .deactivate(&key)
    .await
    .map_err(Error::Engine)?
    .ok_or(Error::KeyNotFound)?;
  Ok(success(record))
}

/// `GET /whatsapp/sessions`
pub async fn list_sessions(
  State(state): State<AppState>,
) -> Result<Json<DataEnvelope<Vec<SessionRecord>>>> {
  let sessions = state.store.list_sessions().await.map_err(Error::Engine)?;
  Ok(success(sessions))
}

/// `POST /whatsapp/sessions/:apiKey/qr`
pub async fn get_qr(
  State(state): State<AppState>,
  Path(api_key): Path<String>,
  body: Option<Json<QrRequest>>,
) -> Result<Json<DataEnvelope<QrResponse>>> {
  let request = body.map(|Json(request)| request).unwrap_or_default();
  let response = state
    .supervisor
    .get_qr(&api_key, request.display_name)
    .await
    .map_err(Error::Engine)?;
  Ok(success(response))
}

/// `POST /whatsapp/sessions/:apiKey/logout`
pub async fn logout(
  State(state): State<AppState>,
  Path(api_key): Path<String>,
) -> Result<Json<MessageEnvelope>> {
  state.supervisor.logout(&api_key).await.map_err(Error::Engine)?;
  Ok(success_message("Logged out"))
}

/// `GET /whatsapp/sessions/:apiKey/status`
pub async fn connection_status(
  State(state): State<AppState>,
  Path(api_key): Path<String>,
) -> Result<Json<DataEnvelope<ConnectionInfo>>> {
  let info = state
    .supervisor
    .connection_status(&api_key)
    .await
    .map_err(Error::Engine)?;
  Ok(success(info))
}

/// `POST /whatsapp/message/:apiKey/send`
pub async fn send_text(
  State(state): State<AppState>,
  Path(api_key): Path<String>,
  Json(request): Json<SendRequest>,
) -> Result<Json<DataEnvelope<SendData>>> {
  let receipt = state
    .supervisor
    .send_text(&api_key, &request.to, &request.text)
    .await
    .map_err(Error::Engine)?;
  Ok(success(SendData {
    message_id: receipt.message_id,
  }))
}
