//! 内存存储门面实现
//! Memory storage facade implementation
//!
//! 供测试和无数据库模式使用；所有操作在一次写锁内完成，因此天然原子
//! Used by tests and the database-less mode; every operation completes inside
//! one write lock and is therefore atomic by construction

use crate::base::Store;
use crate::error::{Error, Result};
use crate::session::{
  ApiKeyRecord, CredentialDump, SessionRecord, SessionStatus, SignalKeyBatch, SignalKeyKind,
};
use crate::upstream::auth::AuthCreds;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// 存储的会话行
/// Stored session row
#[derive(Debug, Clone)]
struct SessionRow {
  id: i64,
  api_key: String,
  display_name: Option<String>,
  status: SessionStatus,
  creds: Option<serde_json::Value>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
  seq: u64,
}

impl SessionRow {
  fn to_record(&self) -> SessionRecord {
    SessionRecord {
      id: self.id,
      api_key: self.api_key.clone(),
      display_name: self.display_name.clone(),
      status: self.status,
      has_creds: self.creds.is_some(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    }
  }
}

/// 存储的锁行
/// Stored lock row
#[derive(Debug, Clone)]
struct LockRow {
  owner_id: String,
  acquired_at: DateTime<Utc>,
}

/// 内存存储状态
/// In-memory storage state
#[derive(Default)]
struct MemoryStorage {
  api_keys: HashMap<String, (u64, ApiKeyRecord)>,
  sessions: HashMap<String, SessionRow>,
  signal_keys: HashMap<(i64, SignalKeyKind, String), serde_json::Value>,
  locks: HashMap<String, LockRow>,
  next_session_id: i64,
  next_seq: u64,
}

impl MemoryStorage {
  fn session_by_id_mut(&mut self, session_id: i64) -> Option<&mut SessionRow> {
    self.sessions.values_mut().find(|row| row.id == session_id)
  }

  fn session_by_id(&self, session_id: i64) -> Option<&SessionRow> {
    self.sessions.values().find(|row| row.id == session_id)
  }
}

/// 内存存储门面
/// In-memory storage facade
#[derive(Default)]
pub struct MemoryStore {
  storage: RwLock<MemoryStorage>,
}

impl MemoryStore {
  /// 创建新的内存存储
  /// Create a new memory store
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  /// 列出全部密钥，最新在前
  /// List all keys, newest first
  async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
    let storage = self.storage.read().await;
    let mut entries: Vec<_> = storage.api_keys.values().cloned().collect();
    entries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(entries.into_iter().map(|(_, record)| record).collect())
  }

  async fn insert_api_key(&self, key: &str, label: Option<&str>) -> Result<ApiKeyRecord> {
    let mut storage = self.storage.write().await;
    if storage.api_keys.contains_key(key) {
      return Err(Error::DuplicateApiKey);
    }
    let now = Utc::now();
    let record = ApiKeyRecord {
      key: key.to_string(),
      label: label.map(str::to_string),
      is_active: true,
      created_at: now,
      updated_at: now,
    };
    storage.next_seq += 1;
    let seq = storage.next_seq;
    storage.api_keys.insert(key.to_string(), (seq, record.clone()));
    Ok(record)
  }

  async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
    let storage = self.storage.read().await;
    Ok(storage.api_keys.get(key).map(|(_, record)| record.clone()))
  }

  async fn deactivate_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
    let mut storage = self.storage.write().await;
    match storage.api_keys.get_mut(key) {
      Some((_, record)) => {
        record.is_active = false;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
      }
      None => Ok(None),
    }
  }

  async fn upsert_session(
    &self,
    api_key: &str,
    display_name: Option<&str>,
  ) -> Result<SessionRecord> {
    let mut storage = self.storage.write().await;
    if let Some(row) = storage.sessions.get_mut(api_key) {
      if let Some(name) = display_name {
        row.display_name = Some(name.to_string());
      }
      row.updated_at = Utc::now();
      return Ok(row.to_record());
    }
    storage.next_session_id += 1;
    storage.next_seq += 1;
    let now = Utc::now();
    let row = SessionRow {
      id: storage.next_session_id,
      api_key: api_key.to_string(),
      display_name: display_name.map(str::to_string),
      status: SessionStatus::Disconnected,
      creds: None,
      created_at: now,
      updated_at: now,
      seq: storage.next_seq,
    };
    let record = row.to_record();
    storage.sessions.insert(api_key.to_string(), row);
    Ok(record)
  }

  async fn find_session(&self, api_key: &str) -> Result<Option<SessionRecord>> {
    let storage = self.storage.read().await;
    Ok(storage.sessions.get(api_key).map(SessionRow::to_record))
  }

  /// 列出全部会话行，最新在前
  /// List all session rows, newest first
  async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
    let storage = self.storage.read().await;
    let mut rows: Vec<_> = storage.sessions.values().collect();
    rows.sort_by(|a, b| b.seq.cmp(&a.seq));
    Ok(rows.into_iter().map(SessionRow::to_record).collect())
  }

  async fn set_session_status(&self, session_id: i64, status: SessionStatus) -> Result<()> {
    let mut storage = self.storage.write().await;
    if let Some(row) = storage.session_by_id_mut(session_id) {
      row.status = status;
      row.updated_at = Utc::now();
    }
    Ok(())
  }

  async fn load_creds(&self, session_id: i64) -> Result<Option<AuthCreds>> {
    let storage = self.storage.read().await;
    match storage.session_by_id(session_id).and_then(|row| row.creds.clone()) {
      Some(value) => Ok(Some(serde_json::from_value(value)?)),
      None => Ok(None),
    }
  }

  async fn save_creds(&self, session_id: i64, creds: &AuthCreds) -> Result<()> {
    let value = serde_json::to_value(creds)?;
    let mut storage = self.storage.write().await;
    if let Some(row) = storage.session_by_id_mut(session_id) {
      row.creds = Some(value);
      row.updated_at = Utc::now();
      Ok(())
    } else {
      Err(Error::SessionNotFound)
    }
  }

  /// 每个请求的 ID 都出现在结果中，未知的映射为 None
  /// Every requested id appears in the result, unknown ones map to None
  async fn load_keys(
    &self,
    session_id: i64,
    kind: SignalKeyKind,
    ids: &[String],
  ) -> Result<HashMap<String, Option<serde_json::Value>>> {
    let storage = self.storage.read().await;
    let mut result = HashMap::with_capacity(ids.len());
    for id in ids {
      let value = storage
        .signal_keys
        .get(&(session_id, kind, id.clone()))
        .cloned();
      result.insert(id.clone(), value);
    }
    Ok(result)
  }

  async fn set_keys(&self, session_id: i64, values: &SignalKeyBatch) -> Result<()> {
    let mut storage = self.storage.write().await;
    for (kind, entries) in values {
      for (id, value) in entries {
        let slot = (session_id, *kind, id.clone());
        match value {
          Some(v) => {
            storage.signal_keys.insert(slot, v.clone());
          }
          None => {
            storage.signal_keys.remove(&slot);
          }
        }
      }
    }
    Ok(())
  }

  async fn clear_session_data(&self, session_id: i64) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage.signal_keys.retain(|(sid, _, _), _| *sid != session_id);
    if let Some(row) = storage.session_by_id_mut(session_id) {
      row.creds = None;
      row.updated_at = Utc::now();
    }
    Ok(())
  }

  async fn credential_dump(&self, session_id: i64) -> Result<CredentialDump> {
    let storage = self.storage.read().await;
    let creds = match storage.session_by_id(session_id).and_then(|row| row.creds.clone()) {
      Some(value) => Some(serde_json::from_value(value)?),
      None => None,
    };
    let mut keys: HashMap<String, HashMap<String, serde_json::Value>> = HashMap::new();
    for ((sid, kind, id), value) in &storage.signal_keys {
      if *sid == session_id {
        keys
          .entry(kind.as_str().to_string())
          .or_default()
          .insert(id.clone(), value.clone());
      }
    }
    Ok(CredentialDump { creds, keys })
  }

  async fn acquire_lock(&self, api_key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
    let mut storage = self.storage.write().await;
    let now = Utc::now();
    match storage.locks.get_mut(api_key) {
      None => {
        storage.locks.insert(
          api_key.to_string(),
          LockRow {
            owner_id: owner_id.to_string(),
            acquired_at: now,
          },
        );
        Ok(true)
      }
      Some(row) if row.owner_id == owner_id => {
        row.acquired_at = now;
        Ok(true)
      }
      Some(row) => {
        let stale = now - row.acquired_at > chrono::Duration::from_std(ttl).unwrap_or_default();
        if stale {
          row.owner_id = owner_id.to_string();
          row.acquired_at = now;
          Ok(true)
        } else {
          Ok(false)
        }
      }
    }
  }

  async fn touch_lock(&self, api_key: &str, owner_id: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    if let Some(row) = storage.locks.get_mut(api_key) {
      if row.owner_id == owner_id {
        row.acquired_at = Utc::now();
      }
    }
    Ok(())
  }

  async fn release_lock(&self, api_key: &str, owner_id: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    if storage
      .locks
      .get(api_key)
      .is_some_and(|row| row.owner_id == owner_id)
    {
      storage.locks.remove(api_key);
    }
    Ok(())
  }

  async fn release_all_locks(&self, owner_id: &str) -> Result<()> {
    let mut storage = self.storage.write().await;
    storage.locks.retain(|_, row| row.owner_id != owner_id);
    Ok(())
  }

  async fn lock_owner(&self, api_key: &str) -> Result<Option<String>> {
    let storage = self.storage.read().await;
    Ok(storage.locks.get(api_key).map(|row| row.owner_id.clone()))
  }
}
