//! PostgresSQL 存储门面实现
//! PostgresSQL storage facade implementation

use super::entity::sessions::SessionState;
use super::entity::{api_keys, session_locks, sessions, signal_keys};
use super::entity::{ApiKeys, SessionLocks, Sessions, SignalKeys};
use crate::base::Store;
use crate::error::{Error, Result};
use crate::session::{
  ApiKeyRecord, CredentialDump, SessionRecord, SessionStatus, SignalKeyBatch, SignalKeyKind,
};
use crate::upstream::auth::AuthCreds;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, Index};
use sea_orm::{
  ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
  IsolationLevel, QueryFilter, QueryOrder, Schema, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::time::Duration;

/// 判断是否为唯一性冲突
/// Check for a uniqueness violation
fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
  let msg = err.to_string();
  msg.contains("duplicate key") || msg.contains("UNIQUE constraint")
}

/// 判断是否为瞬时写冲突（可串行化失败、死锁、并发插入）
/// Check for a transient write conflict (serialisation failure, deadlock, racing insert)
fn is_write_conflict(err: &sea_orm::DbErr) -> bool {
  let msg = err.to_string();
  is_unique_violation(err)
    || msg.contains("could not serialize")
    || msg.contains("deadlock")
    || msg.contains("write conflict")
}

fn key_record(model: api_keys::Model) -> ApiKeyRecord {
  ApiKeyRecord {
    key: model.key,
    label: model.label,
    is_active: model.is_active,
    created_at: model.created_at.with_timezone(&Utc),
    updated_at: model.updated_at.with_timezone(&Utc),
  }
}

/// PostgresSQL 存储门面
/// PostgresSQL storage facade
pub struct PgStore {
  db: DatabaseConnection,
}

impl PgStore {
  /// 基于已有连接创建
  /// Create from an existing connection
  pub fn new(db: DatabaseConnection) -> Self {
    Self { db }
  }

  /// 连接到给定的数据库 URL
  /// Connect to the given database URL
  pub async fn connect(url: &str) -> Result<Self> {
    let db = Database::connect(url).await?;
    Ok(Self { db })
  }

  /// 获取底层连接
  /// Access the underlying connection
  pub fn db(&self) -> &DatabaseConnection {
    &self.db
  }

  /// 若表不存在则按实体定义创建（开发环境自举；正式迁移在引擎之外）
  /// Create missing tables from the entity definitions (dev bootstrap; real
  /// migrations live outside the engine)
  pub async fn ensure_schema(&self) -> Result<()> {
    let backend = self.db.get_database_backend();
    let schema = Schema::new(backend);

    let mut stmt = schema.create_table_from_entity(ApiKeys);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;
    let mut stmt = schema.create_table_from_entity(Sessions);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;
    let mut stmt = schema.create_table_from_entity(SignalKeys);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;
    let mut stmt = schema.create_table_from_entity(SessionLocks);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // (session_id, key_type, key_id) 复合唯一索引
    // Composite unique index on (session_id, key_type, key_id)
    let idx = Index::create()
      .name("uq_whatsapp_credentials_session_type_key")
      .table(Alias::new("whatsapp_credentials"))
      .col(Alias::new("session_id"))
      .col(Alias::new("key_type"))
      .col(Alias::new("key_id"))
      .unique()
      .if_not_exists()
      .to_owned();
    self.db.execute(backend.build(&idx)).await?;

    Ok(())
  }
}

#[async_trait]
impl Store for PgStore {
  /// 列出全部密钥，最新在前
  /// List all keys, newest first
  async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
    let models = ApiKeys::find()
      .order_by_desc(api_keys::Column::CreatedAt)
      .all(&self.db)
      .await?;
    Ok(models.into_iter().map(key_record).collect())
  }

  async fn insert_api_key(&self, key: &str, label: Option<&str>) -> Result<ApiKeyRecord> {
    let now = Utc::now();
    let model = api_keys::ActiveModel {
      key: Set(key.to_string()),
      label: Set(label.map(str::to_string)),
      is_active: Set(true),
      created_at: Set(now.into()),
      updated_at: Set(now.into()),
    };
    match model.insert(&self.db).await {
      Ok(inserted) => Ok(key_record(inserted)),
      Err(e) if is_unique_violation(&e) => Err(Error::DuplicateApiKey),
      Err(e) => Err(e.into()),
    }
  }

  async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
    let model = ApiKeys::find_by_id(key).one(&self.db).await?;
    Ok(model.map(key_record))
  }

  async fn deactivate_api_key(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
    let Some(model) = ApiKeys::find_by_id(key).one(&self.db).await? else {
      return Ok(None);
    };
    let mut active: api_keys::ActiveModel = model.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now().into());
    Ok(Some(key_record(active.update(&self.db).await?)))
  }

  async fn upsert_session(
    &self,
    api_key: &str,
    display_name: Option<&str>,
  ) -> Result<SessionRecord> {
    let existing = Sessions::find()
      .filter(sessions::Column::ApiKey.eq(api_key))
      .one(&self.db)
      .await?;

    if let Some(model) = existing {
      if let Some(name) = display_name {
        let mut active: sessions::ActiveModel = model.into();
        active.display_name = Set(Some(name.to_string()));
        active.updated_at = Set(Utc::now().into());
        return Ok(active.update(&self.db).await?.to_record());
      }
      return Ok(model.to_record());
    }

    let now = Utc::now();
    let model = sessions::ActiveModel {
      api_key: Set(api_key.to_string()),
      display_name: Set(display_name.map(str::to_string)),
      status: Set(SessionState::Disconnected),
      creds: Set(None),
      created_at: Set(now.into()),
      updated_at: Set(now.into()),
      ..Default::default()
    };
    match model.insert(&self.db).await {
      Ok(inserted) => Ok(inserted.to_record()),
      // 并发创建时读取赢家写入的行
      // On a racing create, read the winner's row
      Err(e) if is_unique_violation(&e) => {
        let model = Sessions::find()
          .filter(sessions::Column::ApiKey.eq(api_key))
          .one(&self.db)
          .await?
          .ok_or(Error::SessionNotFound)?;
        Ok(model.to_record())
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn find_session(&self, api_key: &str) -> Result<Option<SessionRecord>> {
    let model = Sessions::find()
      .filter(sessions::Column::ApiKey.eq(api_key))
      .one(&self.db)
      .await?;
    Ok(model.map(|m| m.to_record()))
  }

  async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
    let models = Sessions::find()
      .order_by_desc(sessions::Column::CreatedAt)
      .all(&self.db)
      .await?;
    Ok(models.iter().map(sessions::Model::to_record).collect())
  }

  async fn set_session_status(&self, session_id: i64, status: SessionStatus) -> Result<()> {
    let state = SessionState::try_from(status)?;
    Sessions::update_many()
      .col_expr(sessions::Column::Status, Expr::value(state))
      .col_expr(
        sessions::Column::UpdatedAt,
        Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
      )
      .filter(sessions::Column::Id.eq(session_id))
      .exec(&self.db)
      .await?;
    Ok(())
  }

  async fn load_creds(&self, session_id: i64) -> Result<Option<AuthCreds>> {
    let model = Sessions::find_by_id(session_id).one(&self.db).await?;
    match model.and_then(|m| m.creds) {
      Some(value) => Ok(Some(serde_json::from_value(value)?)),
      None => Ok(None),
    }
  }

  /// 单条 UPDATE，天然原子；快速轮换的多次调用不会交织出撕裂状态
  /// One UPDATE, atomic by nature; rapid rotations never interleave into a torn state
  async fn save_creds(&self, session_id: i64, creds: &AuthCreds) -> Result<()> {
    let value = serde_json::to_value(creds)?;
    let result = Sessions::update_many()
      .col_expr(sessions::Column::Creds, Expr::value(value))
      .col_expr(
        sessions::Column::UpdatedAt,
        Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
      )
      .filter(sessions::Column::Id.eq(session_id))
      .exec(&self.db)
      .await?;
    if result.rows_affected == 0 {
      return Err(Error::SessionNotFound);
    }
    Ok(())
  }

  async fn load_keys(
    &self,
    session_id: i64,
    kind: SignalKeyKind,
    ids: &[String],
  ) -> Result<HashMap<String, Option<serde_json::Value>>> {
    let mut result: HashMap<String, Option<serde_json::Value>> =
      ids.iter().map(|id| (id.clone(), None)).collect();
    if ids.is_empty() {
      return Ok(result);
    }
    let models = SignalKeys::find()
      .filter(signal_keys::Column::SessionId.eq(session_id))
      .filter(signal_keys::Column::KeyType.eq(kind.as_str()))
      .filter(signal_keys::Column::KeyId.is_in(ids.to_vec()))
      .all(&self.db)
      .await?;
    for model in models {
      result.insert(model.key_id, Some(model.value));
    }
    Ok(result)
  }

  /// 一次调用一个事务：出现的键全部 upsert，null 的键全部删除
  /// One transaction per call: present keys are upserted, null keys deleted
  async fn set_keys(&self, session_id: i64, values: &SignalKeyBatch) -> Result<()> {
    let txn = self.db.begin().await?;
    for (kind, entries) in values {
      let deletions: Vec<&String> = entries
        .iter()
        .filter_map(|(id, value)| value.is_none().then_some(id))
        .collect();
      if !deletions.is_empty() {
        SignalKeys::delete_many()
          .filter(signal_keys::Column::SessionId.eq(session_id))
          .filter(signal_keys::Column::KeyType.eq(kind.as_str()))
          .filter(signal_keys::Column::KeyId.is_in(deletions.iter().map(|s| s.as_str())))
          .exec(&txn)
          .await?;
      }

      for (id, value) in entries {
        let Some(value) = value else { continue };
        let existing = SignalKeys::find()
          .filter(signal_keys::Column::SessionId.eq(session_id))
          .filter(signal_keys::Column::KeyType.eq(kind.as_str()))
          .filter(signal_keys::Column::KeyId.eq(id))
          .one(&txn)
          .await?;
        match existing {
          Some(model) => {
            let mut active: signal_keys::ActiveModel = model.into();
            active.value = Set(value.clone());
            active.update(&txn).await?;
          }
          None => {
            let model = signal_keys::ActiveModel {
              session_id: Set(session_id),
              key_type: Set(kind.as_str().to_string()),
              key_id: Set(id.clone()),
              value: Set(value.clone()),
              ..Default::default()
            };
            model.insert(&txn).await?;
          }
        }
      }
    }
    txn.commit().await?;
    Ok(())
  }

  /// 原子地删除下属键并清空根凭证
  /// Atomically delete subordinate keys and null the root credentials
  async fn clear_session_data(&self, session_id: i64) -> Result<()> {
    let txn = self.db.begin().await?;
    SignalKeys::delete_many()
      .filter(signal_keys::Column::SessionId.eq(session_id))
      .exec(&txn)
      .await?;
    if let Some(model) = Sessions::find_by_id(session_id).one(&txn).await? {
      let mut active: sessions::ActiveModel = model.into();
      active.creds = Set(None);
      active.updated_at = Set(Utc::now().into());
      active.update(&txn).await?;
    }
    txn.commit().await?;
    Ok(())
  }

  async fn credential_dump(&self, session_id: i64) -> Result<CredentialDump> {
    let creds = self.load_creds(session_id).await?;
    let models = SignalKeys::find()
      .filter(signal_keys::Column::SessionId.eq(session_id))
      .all(&self.db)
      .await?;
    let mut keys: HashMap<String, HashMap<String, serde_json::Value>> = HashMap::new();
    for model in models {
      keys
        .entry(model.key_type)
        .or_default()
        .insert(model.key_id, model.value);
    }
    Ok(CredentialDump { creds, keys })
  }

  /// 单个可串行化事务内完成创建 / 续租 / 抢占；冲突返回 false
  /// Create / refresh / steal inside one serialisable transaction; conflicts return false
  async fn acquire_lock(&self, api_key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
    let txn = self
      .db
      .begin_with_config(Some(IsolationLevel::Serializable), None)
      .await?;
    let now = Utc::now();
    let existing = SessionLocks::find_by_id(api_key).one(&txn).await?;

    let step = match existing {
      None => {
        let model = session_locks::ActiveModel {
          api_key: Set(api_key.to_string()),
          owner_id: Set(owner_id.to_string()),
          acquired_at: Set(now.into()),
        };
        model.insert(&txn).await.map(|_| ())
      }
      Some(row) if row.owner_id == owner_id => {
        let mut active: session_locks::ActiveModel = row.into();
        active.acquired_at = Set(now.into());
        active.update(&txn).await.map(|_| ())
      }
      Some(row) => {
        let age = now - row.acquired_at.with_timezone(&Utc);
        let stale = age > chrono::Duration::from_std(ttl).unwrap_or_default();
        if !stale {
          txn.rollback().await?;
          return Ok(false);
        }
        let mut active: session_locks::ActiveModel = row.into();
        active.owner_id = Set(owner_id.to_string());
        active.acquired_at = Set(now.into());
        active.update(&txn).await.map(|_| ())
      }
    };

    if let Err(e) = step {
      if is_write_conflict(&e) {
        return Ok(false);
      }
      return Err(e.into());
    }
    match txn.commit().await {
      Ok(()) => Ok(true),
      Err(e) if is_write_conflict(&e) => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  async fn touch_lock(&self, api_key: &str, owner_id: &str) -> Result<()> {
    SessionLocks::update_many()
      .col_expr(
        session_locks::Column::AcquiredAt,
        Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(Utc::now())),
      )
      .filter(session_locks::Column::ApiKey.eq(api_key))
      .filter(session_locks::Column::OwnerId.eq(owner_id))
      .exec(&self.db)
      .await?;
    Ok(())
  }

  async fn release_lock(&self, api_key: &str, owner_id: &str) -> Result<()> {
    SessionLocks::delete_many()
      .filter(session_locks::Column::ApiKey.eq(api_key))
      .filter(session_locks::Column::OwnerId.eq(owner_id))
      .exec(&self.db)
      .await?;
    Ok(())
  }

  async fn release_all_locks(&self, owner_id: &str) -> Result<()> {
    SessionLocks::delete_many()
      .filter(session_locks::Column::OwnerId.eq(owner_id))
      .exec(&self.db)
      .await?;
    Ok(())
  }

  async fn lock_owner(&self, api_key: &str) -> Result<Option<String>> {
    let model = SessionLocks::find_by_id(api_key).one(&self.db).await?;
    Ok(model.map(|row| row.owner_id))
  }
}
