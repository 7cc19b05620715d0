use crate::store::KvStore;
use crate::utils::IntoAnyhow;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use entity::kv_entries as KvEntries;
use entity::kv_hash_fields as KvHashFields;
use entity::kv_set_members as KvSetMembers;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{DatabaseConnection, QueryOrder};
use sea_orm::sea_query::{Expr, OnConflict, Order};
use std::collections::HashMap;

/// Key-value store kept in three sql tables, one per value kind
pub struct SqlStore {
    conn: DatabaseConnection,
}

impl SqlStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        SqlStore { conn }
    }
}

#[async_trait]
impl KvStore for SqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        KvEntries::Entity::find_by_id(key.to_string())
            .one(&self.conn)
            .await
            .map(|entry| entry.map(|e| e.value))
            .anyhow()
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let entry = KvEntries::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            update_at: Set(Utc::now().timestamp()),
        };
        KvEntries::Entity::insert(entry)
            .on_conflict(
                OnConflict::column(KvEntries::Column::Key)
                    .update_columns([KvEntries::Column::Value, KvEntries::Column::UpdateAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .map(|_| ())
            .anyhow()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        KvEntries::Entity::delete_by_id(key.to_string())
            .exec(&self.conn)
            .await
            .map(|_| ())
            .anyhow()
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        let row = KvSetMembers::ActiveModel {
            set_key: Set(set.to_string()),
            member: Set(member.to_string()),
            create_at: Set(Utc::now().timestamp()),
        };
        KvSetMembers::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([KvSetMembers::Column::SetKey, KvSetMembers::Column::Member])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .map(|_| ())
            .anyhow()
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        KvSetMembers::Entity::delete_many()
            .filter(KvSetMembers::Column::SetKey.eq(set))
            .filter(KvSetMembers::Column::Member.eq(member))
            .exec(&self.conn)
            .await
            .map(|_| ())
            .anyhow()
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        KvSetMembers::Entity::find()
            .filter(KvSetMembers::Column::SetKey.eq(set))
            .order_by(KvSetMembers::Column::Member, Order::Asc)
            .all(&self.conn)
            .await
            .map(|rows| rows.into_iter().map(|row| row.member).collect())
            .anyhow()
    }

    async fn hash_increment(&self, hash: &str, field: &str, amount: f64) -> Result<f64> {
        let row = KvHashFields::ActiveModel {
            hash_key: Set(hash.to_string()),
            field: Set(field.to_string()),
            value: Set(amount),
        };
        // the increment happens inside the upsert statement, concurrent callers cannot lose updates
        KvHashFields::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([KvHashFields::Column::HashKey, KvHashFields::Column::Field])
                    .value(
                        KvHashFields::Column::Value,
                        Expr::col(KvHashFields::Column::Value).add(amount),
                    )
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .anyhow()?;

        KvHashFields::Entity::find_by_id((hash.to_string(), field.to_string()))
            .one(&self.conn)
            .await
            .anyhow()
            .map(|row| row.map(|r| r.value).unwrap_or(amount))
    }

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, f64>> {
        KvHashFields::Entity::find()
            .filter(KvHashFields::Column::HashKey.eq(hash))
            .all(&self.conn)
            .await
            .map(|rows| rows.into_iter().map(|row| (row.field, row.value)).collect())
            .anyhow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_db;
    use std::sync::Arc;

    #[tokio::test]
    async fn sql_store_round_trip() {
        let store = SqlStore::new(memory_db().await);
        assert_eq!(store.get("task:1").await.unwrap(), None);
        store.set("task:1", "{}".into()).await.unwrap();
        store.set("task:1", "{\"a\":1}".into()).await.unwrap();
        assert_eq!(store.get("task:1").await.unwrap().as_deref(), Some("{\"a\":1}"));
        store.delete("task:1").await.unwrap();
        assert_eq!(store.get("task:1").await.unwrap(), None);

        store.set_add("tasks:all", "2").await.unwrap();
        store.set_add("tasks:all", "1").await.unwrap();
        store.set_add("tasks:all", "1").await.unwrap();
        assert_eq!(store.set_members("tasks:all").await.unwrap(), vec!["1", "2"]);
        store.set_remove("tasks:all", "2").await.unwrap();
        assert_eq!(store.set_members("tasks:all").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn concurrent_hash_increments_are_not_lost() {
        let store = Arc::new(SqlStore::new(memory_db().await));
        let mut handles = vec![];
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.hash_increment("stats", "totalTasks", 1.0).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let all = store.hash_get_all("stats").await.unwrap();
        assert_eq!(all.get("totalTasks"), Some(&20.0));
        assert_eq!(
            store.hash_increment("stats", "totalPayouts", 0.05).await.unwrap(),
            0.05
        );
    }
}
