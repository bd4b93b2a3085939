//! 会话领域类型
//! Session domain types
//!
//! 定义了租户密钥、会话行、连接信息以及 Signal 键类别
//! Defines tenant keys, session rows, connection info and Signal key kinds

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// 会话状态
/// Session status
///
/// `Connecting` 仅存在于内存中的状态机，不会被持久化
/// `Connecting` exists only in the in-memory state machine and is never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
  Connected,
  Disconnected,
  Connecting,
  Qr,
  LoggedOut,
  Error,
}

impl SessionStatus {
  /// 转换为字符串表示
  /// Convert to the string representation
  pub fn as_str(&self) -> &'static str {
    match self {
      SessionStatus::Connected => "CONNECTED",
      SessionStatus::Disconnected => "DISCONNECTED",
      SessionStatus::Connecting => "CONNECTING",
      SessionStatus::Qr => "QR",
      SessionStatus::LoggedOut => "LOGGED_OUT",
      SessionStatus::Error => "ERROR",
    }
  }

  /// 是否为可持久化状态
  /// Whether the status may be persisted
  pub fn is_durable(&self) -> bool {
    !matches!(self, SessionStatus::Connecting)
  }
}

impl FromStr for SessionStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "CONNECTED" => Ok(SessionStatus::Connected),
      "DISCONNECTED" => Ok(SessionStatus::Disconnected),
      "CONNECTING" => Ok(SessionStatus::Connecting),
      "QR" => Ok(SessionStatus::Qr),
      "LOGGED_OUT" => Ok(SessionStatus::LoggedOut),
      "ERROR" => Ok(SessionStatus::Error),
      other => Err(Error::other(format!("Unknown session status: {other}"))),
    }
  }
}

impl std::fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 租户 API 密钥记录
/// Tenant API key record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
  pub key: String,
  pub label: Option<String>,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// 会话行记录
/// Session row record
///
/// 凭证 blob 本身不在记录中；`has_creds` 表明其是否存在
/// The credential blob itself is not carried; `has_creds` reports its presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
  pub id: i64,
  pub api_key: String,
  pub display_name: Option<String>,
  pub status: SessionStatus,
  pub has_creds: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// 对外公布的连接信息
/// Published connection info
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
  pub api_key: String,
  pub status: SessionStatus,
  pub connected: bool,
}

/// Signal 键类别
/// Signal key kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKeyKind {
  #[serde(rename = "pre-key")]
  PreKey,
  #[serde(rename = "session")]
  Session,
  #[serde(rename = "sender-key")]
  SenderKey,
  #[serde(rename = "app-state-sync-key")]
  AppStateSyncKey,
  #[serde(rename = "app-state-sync-version")]
  AppStateSyncVersion,
}

impl SignalKeyKind {
  /// 转换为存储列中使用的字符串
  /// Convert to the string used in the storage column
  pub fn as_str(&self) -> &'static str {
    match self {
      SignalKeyKind::PreKey => "pre-key",
      SignalKeyKind::Session => "session",
      SignalKeyKind::SenderKey => "sender-key",
      SignalKeyKind::AppStateSyncKey => "app-state-sync-key",
      SignalKeyKind::AppStateSyncVersion => "app-state-sync-version",
    }
  }
}

impl FromStr for SignalKeyKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "pre-key" => Ok(SignalKeyKind::PreKey),
      "session" => Ok(SignalKeyKind::Session),
      "sender-key" => Ok(SignalKeyKind::SenderKey),
      "app-state-sync-key" => Ok(SignalKeyKind::AppStateSyncKey),
      "app-state-sync-version" => Ok(SignalKeyKind::AppStateSyncVersion),
      other => Err(Error::other(format!("Unknown signal key kind: {other}"))),
    }
  }
}

/// 一次 `set_keys` 调用的批量载荷：类别 → 键 ID → 值或删除标记
/// Batch payload of one `set_keys` call: kind → key id → value-or-delete
///
/// `None` 表示删除该键
/// `None` means delete the key
pub type SignalKeyBatch = HashMap<SignalKeyKind, HashMap<String, Option<serde_json::Value>>>;

/// 诊断用的凭证导出
/// Credential export for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CredentialDump {
  pub creds: Option<crate::upstream::auth::AuthCreds>,
  /// 类别字符串 → 键 ID → 原始值
  /// Kind string → key id → raw value
  pub keys: HashMap<String, HashMap<String, serde_json::Value>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_round_trip() {
    for status in [
      SessionStatus::Connected,
      SessionStatus::Disconnected,
      SessionStatus::Connecting,
      SessionStatus::Qr,
      SessionStatus::LoggedOut,
      SessionStatus::Error,
    ] {
      assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
    }
  }

  #[test]
  fn test_status_serialization_matches_wire_names() {
    assert_eq!(
      serde_json::to_string(&SessionStatus::LoggedOut).unwrap(),
      "\"LOGGED_OUT\""
    );
    assert_eq!(serde_json::to_string(&SessionStatus::Qr).unwrap(), "\"QR\"");
  }

  #[test]
  fn test_connecting_is_not_durable() {
    assert!(!SessionStatus::Connecting.is_durable());
    assert!(SessionStatus::LoggedOut.is_durable());
  }

  #[test]
  fn test_key_kind_strings() {
    assert_eq!(SignalKeyKind::PreKey.as_str(), "pre-key");
    assert_eq!(
      "app-state-sync-key".parse::<SignalKeyKind>().unwrap(),
      SignalKeyKind::AppStateSyncKey
    );
    assert!("nope".parse::<SignalKeyKind>().is_err());
  }

  #[test]
  fn test_connection_info_wire_shape() {
    let info = ConnectionInfo {
      api_key: "wg_abc".into(),
      status: SessionStatus::Connected,
      connected: true,
    };
    let value = serde_json::to_value(&info).unwrap();
    assert_eq!(value["apiKey"], "wg_abc");
    assert_eq!(value["status"], "CONNECTED");
    assert_eq!(value["connected"], true);
  }
}
