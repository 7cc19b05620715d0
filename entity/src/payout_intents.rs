use crate::PayoutState;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payout outbox. A row exists from the moment a payout is about to be sent until the
/// approval it pays for has been fully persisted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[sea_orm(table_name = "payout_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub application_id: String,
    pub task_id: String,
    pub wallet_address: String,
    #[sea_orm(column_type = "Double")]
    pub amount: f64,
    pub tx_signature: String,
    pub state: PayoutState,
    pub error_msg: String,
    pub create_at: i64,
    pub update_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
