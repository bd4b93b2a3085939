//! Request and response shapes of the HTTP surface
//!
//! Every response uses the common envelope: successes carry
//! `{status: "success", data | message}`, errors `{status: "error", message}`.

use axum::Json;
use serde::{Deserialize, Serialize};

/// Success envelope with a data payload
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T: Serialize> {
  pub status: &'static str,
  pub data: T,
}

/// Success envelope with a plain message
#[derive(Debug, Serialize)]
pub struct MessageEnvelope {
  pub status: &'static str,
  pub message: String,
}

/// Error envelope
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
  pub status: &'static str,
  pub message: String,
}

/// Wrap a payload in the success envelope
pub fn success<T: Serialize>(data: T) -> Json<DataEnvelope<T>> {
  Json(DataEnvelope {
    status: "success",
    data,
  })
}

/// Wrap a plain message in the success envelope
pub fn success_message<S: Into<String>>(message: S) -> Json<MessageEnvelope> {
  Json(MessageEnvelope {
    status: "success",
    message: message.into(),
  })
}

/// Body of `POST /api-keys`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
  pub label: Option<String>,
}

/// Body of `POST /whatsapp/sessions/:apiKey/qr`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrRequest {
  pub display_name: Option<String>,
}

/// Body of `POST /whatsapp/message/:apiKey/send`
#[derive(Debug, Deserialize)]
pub struct SendRequest {
  pub to: String,
  pub text: String,
}

/// Payload returned after a successful send
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendData {
  pub message_id: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_envelope_shapes() {
    let Json(envelope) = success(serde_json::json!({"n": 1}));
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(value["data"]["n"], 1);

    let Json(envelope) = success_message("Logged out");
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(value["message"], "Logged out");
  }

  #[test]
  fn test_request_bodies_accept_camel_case() {
    let request: QrRequest = serde_json::from_str(r#"{"displayName":"Bot"}"#).unwrap();
    assert_eq!(request.display_name.as_deref(), Some("Bot"));

    let request: SendRequest =
      serde_json::from_str(r#"{"to":"628123456789","text":"hi"}"#).unwrap();
    assert_eq!(request.to, "628123456789");
    assert_eq!(request.text, "hi");
  }
}
