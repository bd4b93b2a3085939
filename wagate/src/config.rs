//! 配置模块
//! Configuration module
//!
//! 定义了会话引擎的配置选项
//! Defines configuration options for the session engine

use crate::base::constants::{
  API_KEY_ENTROPY_BYTES, API_KEY_PREFIX, CONNECT_WAIT_TIMEOUT, DEFAULT_COUNTRY_PREFIX,
  HEARTBEAT_INTERVAL, LOCK_TTL, MAX_KEY_GENERATION_ATTEMPTS, MAX_TEXT_LENGTH, QR_WAIT_TIMEOUT,
  WARM_WAIT_TIMEOUT,
};
use crate::error::{Error, Result};
use std::time::Duration;

/// 引擎配置
/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// 会话锁租约时长
  /// Session lock lease duration
  pub lock_ttl: Duration,
  /// 等待二维码的期限
  /// QR wait deadline
  pub qr_timeout: Duration,
  /// 发送前等待连接的期限
  /// Connection wait deadline before sending
  pub connect_timeout: Duration,
  /// 预热时每个会话的等待期限
  /// Per-session wait deadline during warm-up
  pub warm_timeout: Duration,
  /// 事件流心跳间隔
  /// Event stream heartbeat interval
  pub heartbeat_interval: Duration,
  /// 前导 0 替换为的国家区号
  /// Country prefix substituted for a leading 0
  pub country_prefix: String,
  /// 生成密钥时使用的前缀
  /// Prefix of generated keys
  pub key_prefix: String,
  /// 密钥随机部分的字节数
  /// Random bytes per generated key
  pub key_entropy_bytes: usize,
  /// 唯一性冲突的最大重试次数
  /// Maximum retries on uniqueness collision
  pub max_key_attempts: usize,
  /// 文本消息的最大字符数
  /// Maximum characters per text message
  pub max_text_length: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      lock_ttl: LOCK_TTL,
      qr_timeout: QR_WAIT_TIMEOUT,
      connect_timeout: CONNECT_WAIT_TIMEOUT,
      warm_timeout: WARM_WAIT_TIMEOUT,
      heartbeat_interval: HEARTBEAT_INTERVAL,
      country_prefix: DEFAULT_COUNTRY_PREFIX.to_string(),
      key_prefix: API_KEY_PREFIX.to_string(),
      key_entropy_bytes: API_KEY_ENTROPY_BYTES,
      max_key_attempts: MAX_KEY_GENERATION_ATTEMPTS,
      max_text_length: MAX_TEXT_LENGTH,
    }
  }
}

impl EngineConfig {
  /// 创建新的引擎配置
  /// Create a new engine configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 设置锁租约时长
  /// Set the lock lease duration
  pub fn lock_ttl(mut self, ttl: Duration) -> Self {
    self.lock_ttl = ttl;
    self
  }

  /// 设置二维码等待期限
  /// Set the QR wait deadline
  pub fn qr_timeout(mut self, timeout: Duration) -> Self {
    self.qr_timeout = timeout;
    self
  }

  /// 设置发送前的连接等待期限
  /// Set the connection wait deadline before sending
  pub fn connect_timeout(mut self, timeout: Duration) -> Self {
    self.connect_timeout = timeout;
    self
  }

  /// 设置预热等待期限
  /// Set the warm-up wait deadline
  pub fn warm_timeout(mut self, timeout: Duration) -> Self {
    self.warm_timeout = timeout;
    self
  }

  /// 设置国家区号
  /// Set the country prefix
  pub fn country_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
    self.country_prefix = prefix.into();
    self
  }

  /// 验证配置
  /// Validate the configuration
  pub fn validate(&self) -> Result<()> {
    if self.country_prefix.is_empty() || !self.country_prefix.chars().all(|c| c.is_ascii_digit()) {
      return Err(Error::config("country prefix must be decimal digits"));
    }
    if self.key_entropy_bytes * 8 < 192 {
      return Err(Error::config("API keys require at least 192 bits of entropy"));
    }
    if self.max_key_attempts == 0 {
      return Err(Error::config("key generation needs at least one attempt"));
    }
    if self.max_text_length == 0 {
      return Err(Error::config("text length limit must be positive"));
    }
    if self.lock_ttl.is_zero() {
      return Err(Error::config("lock TTL must be positive"));
    }
    Ok(())
  }
}
