//! Server configuration read from the environment
//!
//! | Variable | Meaning |
//! |---|---|
//! | `PORT` | Listen port, default 3000 |
//! | `DATABASE_URL` | Postgres URL; absent selects the in-memory store |
//! | `SECRET_KEY` | Shared admin secret, required and non-empty |
//! | `API_PREFIX` | Route prefix, default `/api/v1` |
//! | `SOCKET_ENABLED` | `1`/`true`/`yes` enables the WebSocket mirror routes |

use crate::error::{Error, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub port: u16,
  pub database_url: Option<String>,
  pub secret_key: String,
  pub api_prefix: String,
  pub socket_enabled: bool,
}

impl ServerConfig {
  /// Read the configuration from process environment variables
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Read the configuration through an arbitrary lookup (testable)
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let port = match lookup("PORT") {
      Some(raw) => raw.parse::<u16>().map_err(|_| {
        Error::Engine(wagate::error::Error::config(format!(
          "PORT must be a port number, got {raw:?}"
        )))
      })?,
      None => 3000,
    };

    let secret_key = lookup("SECRET_KEY").unwrap_or_default();
    if secret_key.trim().is_empty() {
      return Err(Error::Engine(wagate::error::Error::config(
        "SECRET_KEY must be set and non-empty",
      )));
    }

    let socket_enabled = lookup("SOCKET_ENABLED")
      .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes"))
      .unwrap_or(false);

    Ok(Self {
      port,
      database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
      secret_key,
      api_prefix: lookup("API_PREFIX").unwrap_or_else(|| "/api/v1".to_string()),
      socket_enabled,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    let map: HashMap<&str, &str> = vars.iter().copied().collect();
    move |name| map.get(name).map(|v| v.to_string())
  }

  #[test]
  fn test_defaults() {
    let config = ServerConfig::from_lookup(lookup(&[("SECRET_KEY", "s3cret")])).unwrap();
    assert_eq!(config.port, 3000);
    assert_eq!(config.api_prefix, "/api/v1");
    assert!(config.database_url.is_none());
    assert!(!config.socket_enabled);
  }

  #[test]
  fn test_full_configuration() {
    let config = ServerConfig::from_lookup(lookup(&[
      ("PORT", "8080"),
      ("DATABASE_URL", "postgres://localhost/wagate"),
      ("SECRET_KEY", "s3cret"),
      ("API_PREFIX", "/gateway"),
      ("SOCKET_ENABLED", "true"),
    ]))
    .unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/wagate"));
    assert_eq!(config.api_prefix, "/gateway");
    assert!(config.socket_enabled);
  }

  #[test]
  fn test_secret_key_is_required() {
    assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
    assert!(ServerConfig::from_lookup(lookup(&[("SECRET_KEY", "  ")])).is_err());
  }

  #[test]
  fn test_invalid_port_is_rejected() {
    let result = ServerConfig::from_lookup(lookup(&[("SECRET_KEY", "s"), ("PORT", "not-a-port")]));
    assert!(result.is_err());
  }
}
