//! Signal 键实体
//! Signal key entity

use sea_orm::entity::prelude::*;

/// Signal 键实体模型
/// Signal key entity model
///
/// `(session_id, key_type, key_id)` 复合唯一；索引在建表时创建
/// `(session_id, key_type, key_id)` is composite-unique; the index is created with the table
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "whatsapp_credentials")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub session_id: i64,
  pub key_type: String,
  pub key_id: String,
  pub value: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::sessions::Entity",
    from = "Column::SessionId",
    to = "super::sessions::Column::Id",
    on_update = "Cascade",
    on_delete = "Cascade"
  )]
  Session,
}

impl Related<super::sessions::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Session.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
