use sea_orm_migration::prelude::*;

use entity::payout_intents as PayoutIntents;
use log::warn;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20240315_000001_create_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PayoutIntents::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PayoutIntents::Column::ApplicationId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::TaskId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::WalletAddress)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::Amount)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::TxSignature)
                            .string()
                            .default("")
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::State)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::ErrorMsg)
                            .string()
                            .default("")
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::CreateAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PayoutIntents::Column::UpdateAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(PayoutIntents::Entity)
                    .name("payout_intents_state")
                    .col(PayoutIntents::Column::State)
                    .to_owned(),
            )
            .await
            .ignore_exist()
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PayoutIntents::Entity).to_owned())
            .await
    }
}

trait IgnoreExistDbResult {
    fn ignore_exist(self) -> Result<(), DbErr>;
}

impl IgnoreExistDbResult for Result<(), DbErr> {
    fn ignore_exist(self) -> Result<(), DbErr> {
        match self {
            Err(e) => {
                let e_str = e.to_string();
                if e_str.contains("Duplicate key name") || e_str.contains("already exists") {
                    warn!("ignore duplicate index {}", e_str);
                    Ok(())
                } else {
                    Err(e)
                }
            }
            _ => Ok(()),
        }
    }
}
