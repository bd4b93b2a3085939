//! 会话实体
//! Session entity

use sea_orm::entity::prelude::*;

/// 持久化的会话状态枚举
/// Persisted session state enum
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum SessionState {
  #[sea_orm(string_value = "CONNECTED")]
  Connected,
  #[sea_orm(string_value = "DISCONNECTED")]
  Disconnected,
  #[sea_orm(string_value = "QR")]
  Qr,
  #[sea_orm(string_value = "LOGGED_OUT")]
  LoggedOut,
  #[sea_orm(string_value = "ERROR")]
  Error,
}

impl From<SessionState> for crate::session::SessionStatus {
  fn from(state: SessionState) -> Self {
    match state {
      SessionState::Connected => Self::Connected,
      SessionState::Disconnected => Self::Disconnected,
      SessionState::Qr => Self::Qr,
      SessionState::LoggedOut => Self::LoggedOut,
      SessionState::Error => Self::Error,
    }
  }
}

impl TryFrom<crate::session::SessionStatus> for SessionState {
  type Error = crate::error::Error;

  /// `Connecting` 是纯内存状态，拒绝持久化
  /// `Connecting` is memory-only and refuses persistence
  fn try_from(
    status: crate::session::SessionStatus,
  ) -> std::result::Result<Self, crate::error::Error> {
    use crate::session::SessionStatus;
    match status {
      SessionStatus::Connected => Ok(Self::Connected),
      SessionStatus::Disconnected => Ok(Self::Disconnected),
      SessionStatus::Qr => Ok(Self::Qr),
      SessionStatus::LoggedOut => Ok(Self::LoggedOut),
      SessionStatus::Error => Ok(Self::Error),
      SessionStatus::Connecting => Err(crate::error::Error::other(
        "CONNECTING is never persisted",
      )),
    }
  }
}

/// 会话实体模型
/// Session entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "whatsapp_sessions")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  #[sea_orm(unique)]
  pub api_key: String,
  pub display_name: Option<String>,
  pub status: SessionState,
  /// 根凭证 blob；登出后为 NULL
  /// Root credential blob; NULL after logout
  #[sea_orm(nullable)]
  pub creds: Option<Json>,
  pub created_at: DateTimeWithTimeZone,
  pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::api_keys::Entity",
    from = "Column::ApiKey",
    to = "super::api_keys::Column::Key",
    on_update = "Cascade",
    on_delete = "Restrict"
  )]
  ApiKey,
  #[sea_orm(has_many = "super::signal_keys::Entity")]
  SignalKeys,
}

impl Related<super::api_keys::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::ApiKey.def()
  }
}

impl Related<super::signal_keys::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::SignalKeys.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
  /// 转换为领域记录
  /// Convert to the domain record
  pub fn to_record(&self) -> crate::session::SessionRecord {
    crate::session::SessionRecord {
      id: self.id,
      api_key: self.api_key.clone(),
      display_name: self.display_name.clone(),
      status: self.status.clone().into(),
      has_creds: self.creds.is_some(),
      created_at: self.created_at.with_timezone(&chrono::Utc),
      updated_at: self.updated_at.with_timezone(&chrono::Utc),
    }
  }
}
