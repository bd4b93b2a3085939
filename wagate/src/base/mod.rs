//! 存储门面模块
//! Storage facade module
//!
//! 定义了会话引擎与持久化后端交互的抽象层
//! Defines the abstraction layer between the session engine and the durable backend

use crate::error::Result;
use crate::session::{
  ApiKeyRecord, CredentialDump, SessionRecord, SessionStatus, SignalKeyBatch, SignalKeyKind,
};
use crate::upstream::auth::AuthCreds;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub mod constants;

/// 存储门面特性，定义了引擎所需的全部持久化接口
/// Storage facade trait, defines every persistence interface the engine needs
///
/// 按职责分组：租户密钥、会话行、凭证、会话锁
/// Grouped by concern: tenant keys, session rows, credentials, session locks
#[async_trait]
pub trait Store: Send + Sync {
  // === 租户密钥操作 ===
  // === Tenant key operations ===

  /// 列出全部密钥，最新在前
  /// List all keys, newest first
  async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>>;

  /// 插入新密钥；唯一性冲突返回 `DuplicateApiKey`
  /// Insert a new key; uniqueness conflict yields `DuplicateApiKey`
  async fn insert_api_key(&self, key: &str, label: Option<&str>) -> Result<ApiKeyRecord>;

  /// 按密钥查找记录
  /// Find a record by key
  async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>>;

  /// 停用密钥；密钥不存在时返回 None
  /// Deactivate a key; None when the key does not exist
  async fn deactivate_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>>;

  // === 会话行操作 ===
  // === Session row operations ===

  /// 创建或更新会话行；提供的显示名会被保存
  /// Create or update the session row; a provided display name is stored
  async fn upsert_session(
    &self,
    api_key: &str,
    display_name: Option<&str>,
  ) -> Result<SessionRecord>;

  /// 按租户密钥查找会话行
  /// Find the session row by tenant key
  async fn find_session(&self, api_key: &str) -> Result<Option<SessionRecord>>;

  /// 列出全部会话行，最新在前
  /// List all session rows, newest first
  async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

  /// 持久化会话状态
  /// Persist the session status
  async fn set_session_status(&self, session_id: i64, status: SessionStatus) -> Result<()>;

  // === 凭证操作 ===
  // === Credential operations ===

  /// 读取根凭证
  /// Load root credentials
  async fn load_creds(&self, session_id: i64) -> Result<Option<AuthCreds>>;

  /// 写入根凭证；每次调用必须原子生效
  /// Store root credentials; each call must take effect atomically
  async fn save_creds(&self, session_id: i64, creds: &AuthCreds) -> Result<()>;

  /// 批量读取 Signal 键；每个请求的 ID 都必须出现在结果中
  /// Batch-read Signal keys; every requested id must appear in the result
  async fn load_keys(
    &self,
    session_id: i64,
    kind: SignalKeyKind,
    ids: &[String],
  ) -> Result<HashMap<String, Option<serde_json::Value>>>;

  /// 批量写入/删除 Signal 键，一次调用一个逻辑事务
  /// Batch upsert/delete Signal keys, one logical transaction per call
  async fn set_keys(&self, session_id: i64, values: &SignalKeyBatch) -> Result<()>;

  /// 原子地删除全部下属键并清空根凭证
  /// Atomically delete all subordinate keys and null the root credentials
  async fn clear_session_data(&self, session_id: i64) -> Result<()>;

  /// 只读导出凭证与全部键（诊断用）
  /// Read-only export of credentials and all keys (diagnostics)
  async fn credential_dump(&self, session_id: i64) -> Result<CredentialDump>;

  // === 会话锁操作 ===
  // === Session lock operations ===

  /// 在单个可串行化步骤内：创建 / 续租（同一持有者）/ 抢占（过期）/ 否则返回 false
  /// In one serialisable step: create / refresh (same owner) / steal (stale) / otherwise false
  ///
  /// 瞬时写冲突返回 false 而不是报错
  /// Transient write conflicts return false instead of raising
  async fn acquire_lock(&self, api_key: &str, owner_id: &str, ttl: Duration) -> Result<bool>;

  /// 仅当持有者匹配时刷新租约；否则静默无操作
  /// Refresh the lease only when the owner matches; silent no-op otherwise
  async fn touch_lock(&self, api_key: &str, owner_id: &str) -> Result<()>;

  /// 仅当持有者匹配时删除锁
  /// Delete the lock only when the owner matches
  async fn release_lock(&self, api_key: &str, owner_id: &str) -> Result<()>;

  /// 删除该持有者的全部锁（优雅关闭时使用）
  /// Delete all locks of the owner (used on graceful shutdown)
  async fn release_all_locks(&self, owner_id: &str) -> Result<()>;

  /// 查询当前持有者
  /// Query the current owner
  async fn lock_owner(&self, api_key: &str) -> Result<Option<String>>;
}
