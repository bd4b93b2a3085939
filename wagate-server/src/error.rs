//! Error types and HTTP surface mapping for wagate-server

use crate::message::ErrorEnvelope;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type for wagate-server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for wagate-server
#[derive(Error, Debug)]
pub enum Error {
  /// Engine error
  #[error(transparent)]
  Engine(#[from] wagate::error::Error),

  /// Shared-secret admin header missing or wrong
  #[error("Invalid secret key")]
  InvalidSecretKey,

  /// Admin tried to deactivate a key that does not exist
  #[error("API key not found")]
  KeyNotFound,
}

impl Error {
  /// Map the error kind to its HTTP status code
  pub fn status_code(&self) -> StatusCode {
    use wagate::error::Error as Engine;
    match self {
      Error::InvalidSecretKey => StatusCode::FORBIDDEN,
      Error::KeyNotFound => StatusCode::NOT_FOUND,
      Error::Engine(engine) => match engine {
        Engine::KeyNotRegistered => StatusCode::FORBIDDEN,
        Engine::SessionNotFound => StatusCode::NOT_FOUND,
        Engine::SessionLoggedOut => StatusCode::CONFLICT,
        Engine::SessionLocked { .. } => StatusCode::LOCKED,
        Engine::Validation { .. } => StatusCode::BAD_REQUEST,
        Engine::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        Engine::QrTimeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status_code();
    // 500-class internals are logged in full but surfaced generically; the
    // key-exhaustion message is part of the public contract and passes through
    let message = match &self {
      Error::Engine(engine)
        if status == StatusCode::INTERNAL_SERVER_ERROR
          && !matches!(engine, wagate::error::Error::KeyExhaustion) =>
      {
        tracing::error!(error = %engine, "request failed with internal error");
        "Internal server error".to_string()
      }
      other => other.to_string(),
    };
    (
      status,
      Json(ErrorEnvelope {
        status: "error",
        message,
      }),
    )
      .into_response()
  }
}
