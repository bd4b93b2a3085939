//! 租户密钥注册表模块
//! Tenant key registry module
//!
//! 负责生成、列出、校验和停用 API 密钥
//! Generates, lists, validates and deactivates API keys

use crate::base::Store;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::session::ApiKeyRecord;
use std::sync::Arc;
use tracing::warn;

/// 密钥注册表，封装存储门面之上的密钥业务规则
/// Key registry, wraps the key business rules above the storage facade
#[derive(Clone)]
pub struct KeyRegistry {
  store: Arc<dyn Store>,
  key_prefix: String,
  entropy_bytes: usize,
  max_attempts: usize,
}

impl KeyRegistry {
  /// 创建新的注册表
  /// Create a new registry
  pub fn new(store: Arc<dyn Store>, config: &EngineConfig) -> Self {
    Self {
      store,
      key_prefix: config.key_prefix.clone(),
      entropy_bytes: config.key_entropy_bytes,
      max_attempts: config.max_key_attempts,
    }
  }

  /// 列出全部密钥，最新在前
  /// List all keys, newest first
  pub async fn list(&self) -> Result<Vec<ApiKeyRecord>> {
    self.store.list_api_keys().await
  }

  /// 生成带前缀的随机密钥；唯一性冲突时有限次重试
  /// Generate a prefixed random key; bounded retries on uniqueness collision
  pub async fn generate(&self, label: Option<&str>) -> Result<ApiKeyRecord> {
    for attempt in 1..=self.max_attempts {
      let key = self.random_key();
      match self.store.insert_api_key(&key, label).await {
        Ok(record) => return Ok(record),
        Err(Error::DuplicateApiKey) => {
          warn!(attempt, "API key collision, regenerating");
        }
        Err(e) => return Err(e),
      }
    }
    Err(Error::KeyExhaustion)
  }

  /// 校验密钥存在且处于激活状态
  /// Assert the key exists and is active
  ///
  /// 缺失与停用统一返回 `KeyNotRegistered`
  /// Missing and deactivated both yield `KeyNotRegistered`
  pub async fn assert_active(&self, key: &str) -> Result<ApiKeyRecord> {
    let trimmed = key.trim();
    match self.store.find_api_key(trimmed).await? {
      Some(record) if record.is_active => Ok(record),
      _ => Err(Error::KeyNotRegistered),
    }
  }

  /// 停用密钥；密钥不存在时返回 None
  /// Deactivate a key; None when the key does not exist
  pub async fn deactivate(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
    self.store.deactivate_api_key(key.trim()).await
  }

  /// 生成一个小写十六进制随机密钥
  /// Generate a lower-hex random key
  fn random_key(&self) -> String {
    use rand::Rng;
    let mut bytes = vec![0u8; self.entropy_bytes];
    rand::rng().fill(bytes.as_mut_slice());
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}{}", self.key_prefix, hex)
  }
}
