//! 会话锁实体
//! Session lock entity

use sea_orm::entity::prelude::*;

/// 会话锁实体模型，每个租户密钥至多一行
/// Session lock entity model, at most one row per tenant key
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "whatsapp_session_locks")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub api_key: String,
  #[sea_orm(indexed)]
  pub owner_id: String,
  pub acquired_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
