use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Members of the index sets, one row per (set, member) pair
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "kv_set_members")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub set_key: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub member: String,
    pub create_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
