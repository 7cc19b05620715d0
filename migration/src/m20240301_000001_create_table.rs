use sea_orm_migration::prelude::*;

use entity::kv_entries as KvEntries;
use entity::kv_hash_fields as KvHashFields;
use entity::kv_set_members as KvSetMembers;
use entity::resource_info as ResourceInfo;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20240301_000001_create_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(KvEntries::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(KvEntries::Column::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(KvEntries::Column::Value).text().not_null())
                    .col(
                        ColumnDef::new(KvEntries::Column::UpdateAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(KvSetMembers::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(KvSetMembers::Column::SetKey)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(KvSetMembers::Column::Member)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(KvSetMembers::Column::CreateAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(KvSetMembers::Column::SetKey)
                            .col(KvSetMembers::Column::Member),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(KvHashFields::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(KvHashFields::Column::HashKey)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(KvHashFields::Column::Field)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(KvHashFields::Column::Value)
                            .double()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(KvHashFields::Column::HashKey)
                            .col(KvHashFields::Column::Field),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ResourceInfo::Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ResourceInfo::Column::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ResourceInfo::Column::ContentType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceInfo::Column::Data)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceInfo::Column::CreateAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ResourceInfo::Entity).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(KvHashFields::Entity).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(KvSetMembers::Entity).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(KvEntries::Entity).to_owned())
            .await
    }
}
