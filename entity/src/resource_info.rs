use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

// Uploaded proof images when the db resource type is selected, keyed by content id
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "resource_infos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    pub content_type: String,
    pub data: Vec<u8>,
    #[sea_orm(column_type = "Integer")]
    pub create_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
