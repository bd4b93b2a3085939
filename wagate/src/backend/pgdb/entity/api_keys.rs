//! 租户密钥实体
//! Tenant key entity

use sea_orm::entity::prelude::*;

/// 租户密钥实体模型
/// Tenant key entity model
///
/// 密钥从不硬删除，停用通过 `is_active` 标记
/// Keys are never hard-deleted; deactivation flips `is_active`
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub key: String,
  pub label: Option<String>,
  pub is_active: bool,
  pub created_at: DateTimeWithTimeZone,
  pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_one = "super::sessions::Entity")]
  Session,
}

impl Related<super::sessions::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Session.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
