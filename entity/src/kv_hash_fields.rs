use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Numeric hash fields, used for the aggregate counters
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "kv_hash_fields")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub hash_key: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub field: String,
    #[sea_orm(column_type = "Double")]
    pub value: f64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
