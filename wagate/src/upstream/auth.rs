//! 认证材料模块
//! Authentication material module
//!
//! 定义了 Signal 根凭证、密钥对以及套接字构造所需的认证状态
//! Defines the Signal root credentials, key pairs and the auth state a socket is built with

use crate::base::Store;
use crate::error::Result;
use crate::session::{SignalKeyBatch, SignalKeyKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 二进制字段的 base64 编解码
/// Base64 (de)serialisation for binary fields
///
/// JSON 中的字节缓冲必须保持双射，往返读取得到结构相等的值
/// Byte buffers in JSON must stay bijective so a round-trip reads back a structurally equal value
mod b64 {
  use base64::prelude::*;
  use serde::{Deserialize, Deserializer, Serialize, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    BASE64_STANDARD.encode(bytes).serialize(serializer)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD
      .decode(encoded.as_bytes())
      .map_err(serde::de::Error::custom)
  }
}

/// Curve25519 密钥对
/// Curve25519 key pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
  #[serde(with = "b64")]
  pub public: Vec<u8>,
  #[serde(with = "b64")]
  pub private: Vec<u8>,
}

impl KeyPair {
  /// 生成新的随机密钥对
  /// Generate a fresh random key pair
  pub fn generate() -> Self {
    Self {
      public: random_bytes(32),
      private: random_bytes(32),
    }
  }
}

/// 带签名的预共享密钥
/// Signed pre-key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
  pub key_pair: KeyPair,
  #[serde(with = "b64")]
  pub signature: Vec<u8>,
  pub key_id: u32,
}

/// 配对完成后绑定的账号身份
/// Account identity bound after pairing completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundIdentity {
  pub jid: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
}

/// 会话的根凭证
/// Root credentials of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCreds {
  pub registration_id: u32,
  pub noise_key: KeyPair,
  pub signed_identity_key: KeyPair,
  pub signed_pre_key: SignedPreKey,
  #[serde(with = "b64")]
  pub adv_secret_key: Vec<u8>,
  pub next_pre_key_id: u32,
  pub first_unuploaded_pre_key_id: u32,
  /// 配对成功前为空
  /// Empty until pairing succeeds
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub me: Option<BoundIdentity>,
}

/// 生成指定长度的随机字节
/// Generate random bytes of the given length
fn random_bytes(len: usize) -> Vec<u8> {
  use rand::Rng;
  let mut buf = vec![0u8; len];
  rand::rng().fill(buf.as_mut_slice());
  buf
}

/// 合成一份全新的根凭证
/// Synthesise a brand-new set of root credentials
pub fn init_auth_creds() -> AuthCreds {
  AuthCreds {
    // 注册 ID 的取值范围与移动端一致
    // Registration id range matches the mobile clients
    registration_id: rand::random::<u32>() % 16_380 + 1,
    noise_key: KeyPair::generate(),
    signed_identity_key: KeyPair::generate(),
    signed_pre_key: SignedPreKey {
      key_pair: KeyPair::generate(),
      signature: random_bytes(64),
      key_id: 1,
    },
    adv_secret_key: random_bytes(32),
    next_pre_key_id: 1,
    first_unuploaded_pre_key_id: 1,
    me: None,
  }
}

/// Signal 键的读写回调，上游库在协议处理中调用
/// Signal key read/write callbacks, invoked by the upstream library during protocol handling
#[async_trait]
pub trait SignalKeyStore: Send + Sync {
  /// 读取一批键；未知 ID 对应 None
  /// Read a batch of keys; unknown ids map to None
  async fn get(
    &self,
    kind: SignalKeyKind,
    ids: &[String],
  ) -> Result<HashMap<String, Option<serde_json::Value>>>;

  /// 批量写入/删除
  /// Batch upsert/delete
  async fn set(&self, values: &SignalKeyBatch) -> Result<()>;
}

/// 将某个会话的 Signal 键绑定到存储门面
/// Binds one session's Signal keys to the storage facade
pub struct SessionKeys {
  store: Arc<dyn Store>,
  session_id: i64,
}

impl SessionKeys {
  /// 创建绑定到指定会话的键存储
  /// Create a key store bound to the given session
  pub fn new(store: Arc<dyn Store>, session_id: i64) -> Self {
    Self { store, session_id }
  }
}

#[async_trait]
impl SignalKeyStore for SessionKeys {
  async fn get(
    &self,
    kind: SignalKeyKind,
    ids: &[String],
  ) -> Result<HashMap<String, Option<serde_json::Value>>> {
    self.store.load_keys(self.session_id, kind, ids).await
  }

  async fn set(&self, values: &SignalKeyBatch) -> Result<()> {
    self.store.set_keys(self.session_id, values).await
  }
}

/// 构造套接字时交给上游库的认证状态
/// Auth state handed to the upstream library when constructing a socket
///
/// 凭证更新通过 `creds.update` 事件回流，由监督器负责持久化
/// Credential updates flow back via `creds.update` events; the supervisor persists them
#[derive(Clone)]
pub struct AuthState {
  pub creds: AuthCreds,
  pub keys: Arc<dyn SignalKeyStore>,
}
