//! 错误处理模块
//! Error handling module
//!
//! 定义了会话引擎中使用的各种错误类型
//! Defines the error types used by the session engine

use thiserror::Error;

/// 引擎的结果类型
/// Result type for the engine
pub type Result<T> = std::result::Result<T, Error>;

/// 会话引擎错误类型
/// Session engine error type
#[derive(Error, Debug)]
pub enum Error {
  /// SeaORM 数据库错误
  /// SeaORM database error
  #[error("Database error: {0}")]
  Db(#[from] sea_orm::DbErr),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// API 密钥未注册或已停用
  /// API key is missing or deactivated
  ///
  /// 缺失和停用返回同一错误，避免泄露密钥是否存在
  /// Missing and deactivated keys share one error so key existence does not leak
  #[error("API key not registered")]
  KeyNotRegistered,

  /// 密钥生成重试次数耗尽
  /// Key generation retries exhausted
  #[error("Unable to generate API key, please retry")]
  KeyExhaustion,

  /// 密钥唯一性冲突
  /// API key uniqueness conflict
  #[error("API key already exists")]
  DuplicateApiKey,

  /// 会话行不存在
  /// Session row does not exist
  #[error("Whatsapp session not found")]
  SessionNotFound,

  /// 会话已登出
  /// Session has been logged out
  #[error("Session is logged out")]
  SessionLoggedOut,

  /// 会话锁由其他进程持有
  /// Session lock is held by another process
  #[error("Session is handled by another instance: {owner}")]
  SessionLocked { owner: String },

  /// 等待连接超时
  /// Timed out waiting for the connection
  #[error("Session not connected")]
  NotConnected,

  /// 等待配对二维码超时
  /// Timed out waiting for the pairing QR code
  #[error("QR code generation timeout")]
  QrTimeout,

  /// 请求参数校验失败
  /// Request validation failure
  #[error("{message}")]
  Validation { message: String },

  /// 上游 WhatsApp 传输错误
  /// Upstream WhatsApp transport error
  #[error("Upstream error: {message}")]
  Upstream { message: String },

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// 其他错误
  /// Other error
  #[error("{message}")]
  Other { message: String },
}

impl Error {
  /// 创建校验错误
  /// Create a validation error
  pub fn validation<S: Into<String>>(message: S) -> Self {
    Self::Validation {
      message: message.into(),
    }
  }

  /// 创建上游错误
  /// Create an upstream error
  pub fn upstream<S: Into<String>>(message: S) -> Self {
    Self::Upstream {
      message: message.into(),
    }
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  /// 检查是否为调用方错误（可安全透出消息）
  /// Check whether this is a caller error (message safe to surface)
  pub fn is_caller_error(&self) -> bool {
    matches!(
      self,
      Error::KeyNotRegistered
        | Error::SessionNotFound
        | Error::SessionLoggedOut
        | Error::SessionLocked { .. }
        | Error::NotConnected
        | Error::QrTimeout
        | Error::Validation { .. }
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_creation() {
    let err = Error::validation("Invalid 'text' (1-1000 chars)");
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(err.to_string(), "Invalid 'text' (1-1000 chars)");

    let err = Error::upstream("socket torn down");
    assert!(matches!(err, Error::Upstream { .. }));

    let err = Error::config("SECRET_KEY must not be empty");
    assert!(matches!(err, Error::Config { .. }));
  }

  #[test]
  fn test_uniform_key_error_message() {
    // 缺失与停用必须不可区分
    // Missing and deactivated must be indistinguishable
    assert_eq!(Error::KeyNotRegistered.to_string(), "API key not registered");
  }

  #[test]
  fn test_caller_errors() {
    assert!(Error::SessionNotFound.is_caller_error());
    assert!(Error::QrTimeout.is_caller_error());
    assert!(Error::SessionLocked {
      owner: "host-1".into()
    }
    .is_caller_error());
    assert!(!Error::KeyExhaustion.is_caller_error());
    assert!(!Error::other("boom").is_caller_error());
  }

  #[test]
  fn test_locked_error_carries_owner_hint() {
    let err = Error::SessionLocked {
      owner: "worker-2-4711".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("handled by another instance"));
    assert!(msg.contains("worker-2-4711"));
  }
}
