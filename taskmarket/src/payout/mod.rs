//! Durable record of payouts in flight.
//!
//! An intent is written before the treasury is asked to pay and removed once the approval it
//! pays for is persisted, so a crash or an unanswered payment leaves a trace the operator (or
//! startup reconciliation) can act on.

use crate::utils::IntoAnyhow;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use entity::payout_intents as PayoutIntents;
use entity::PayoutState;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, Order};
use sea_orm::ActiveValue::Set;
use sea_orm::{DatabaseConnection, QueryOrder};

mod memory;

pub use memory::MemoryLedger;
pub use PayoutIntents::Model as PayoutIntent;

#[async_trait]
pub trait PayoutLedger {
    /// Record a payout about to be sent, fails when the application already has an intent
    async fn record_intent(
        &self,
        application_id: &str,
        task_id: &str,
        wallet_address: &str,
        amount: f64,
    ) -> Result<PayoutIntent>;
    async fn mark_unknown(&self, application_id: &str, signature: Option<String>, reason: &str) -> Result<()>;
    /// Remember the signature of a submitted transfer, the state stays as it is
    async fn attach_signature(&self, application_id: &str, signature: &str) -> Result<()>;
    async fn mark_sent(&self, application_id: &str, signature: &str) -> Result<()>;
    /// The counters owed for the payout have been applied
    async fn mark_counted(&self, application_id: &str) -> Result<()>;
    async fn delete(&self, application_id: &str) -> Result<()>;
    async fn get(&self, application_id: &str) -> Result<Option<PayoutIntent>>;
    /// All intents, oldest first
    async fn list(&self) -> Result<Vec<PayoutIntent>>;
}

pub(crate) fn new_intent(application_id: &str, task_id: &str, wallet_address: &str, amount: f64) -> PayoutIntent {
    let now = Utc::now().timestamp();
    PayoutIntent {
        application_id: application_id.to_string(),
        task_id: task_id.to_string(),
        wallet_address: wallet_address.to_string(),
        amount,
        tx_signature: "".to_string(),
        state: PayoutState::Sending,
        error_msg: "".to_string(),
        create_at: now,
        update_at: now,
    }
}

pub struct DbLedger {
    conn: DatabaseConnection,
}

impl DbLedger {
    pub fn new(conn: DatabaseConnection) -> Self {
        DbLedger { conn }
    }

    async fn update_state(
        &self,
        application_id: &str,
        state: Option<PayoutState>,
        signature: Option<String>,
        error_msg: Option<&str>,
    ) -> Result<()> {
        let mut update = PayoutIntents::Entity::update_many()
            .col_expr(PayoutIntents::Column::UpdateAt, Expr::value(Utc::now().timestamp()));
        if let Some(state) = state {
            update = update.col_expr(PayoutIntents::Column::State, Expr::value(state));
        }
        if let Some(signature) = signature {
            update = update.col_expr(PayoutIntents::Column::TxSignature, Expr::value(signature));
        }
        if let Some(msg) = error_msg {
            update = update.col_expr(PayoutIntents::Column::ErrorMsg, Expr::value(msg.to_string()));
        }
        let result = update
            .filter(PayoutIntents::Column::ApplicationId.eq(application_id.to_string()))
            .exec(&self.conn)
            .await?;
        if result.rows_affected == 0 {
            bail!("payout intent {} not found", application_id);
        }
        Ok(())
    }
}

#[async_trait]
impl PayoutLedger for DbLedger {
    async fn record_intent(
        &self,
        application_id: &str,
        task_id: &str,
        wallet_address: &str,
        amount: f64,
    ) -> Result<PayoutIntent> {
        if self.get(application_id).await?.is_some() {
            bail!("payout for application {} is already in progress", application_id);
        }
        let intent = new_intent(application_id, task_id, wallet_address, amount);
        let model = PayoutIntents::ActiveModel {
            application_id: Set(intent.application_id.clone()),
            task_id: Set(intent.task_id.clone()),
            wallet_address: Set(intent.wallet_address.clone()),
            amount: Set(intent.amount),
            tx_signature: Set(intent.tx_signature.clone()),
            state: Set(intent.state),
            error_msg: Set(intent.error_msg.clone()),
            create_at: Set(intent.create_at),
            update_at: Set(intent.update_at),
        };
        PayoutIntents::Entity::insert(model)
            .exec_without_returning(&self.conn)
            .await?;
        Ok(intent)
    }

    async fn mark_unknown(&self, application_id: &str, signature: Option<String>, reason: &str) -> Result<()> {
        self.update_state(application_id, Some(PayoutState::Unknown), signature, Some(reason))
            .await
    }

    async fn attach_signature(&self, application_id: &str, signature: &str) -> Result<()> {
        self.update_state(application_id, None, Some(signature.to_string()), None)
            .await
    }

    async fn mark_sent(&self, application_id: &str, signature: &str) -> Result<()> {
        self.update_state(application_id, Some(PayoutState::Sent), Some(signature.to_string()), Some(""))
            .await
    }

    async fn mark_counted(&self, application_id: &str) -> Result<()> {
        self.update_state(application_id, Some(PayoutState::Counted), None, None)
            .await
    }

    async fn delete(&self, application_id: &str) -> Result<()> {
        PayoutIntents::Entity::delete_by_id(application_id.to_string())
            .exec(&self.conn)
            .await
            .map(|_| ())
            .anyhow()
    }

    async fn get(&self, application_id: &str) -> Result<Option<PayoutIntent>> {
        PayoutIntents::Entity::find_by_id(application_id.to_string())
            .one(&self.conn)
            .await
            .anyhow()
    }

    async fn list(&self) -> Result<Vec<PayoutIntent>> {
        PayoutIntents::Entity::find()
            .order_by(PayoutIntents::Column::CreateAt, Order::Asc)
            .order_by(PayoutIntents::Column::ApplicationId, Order::Asc)
            .all(&self.conn)
            .await
            .anyhow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::memory_db;
    use std::sync::Arc;

    async fn exercise(ledger: Arc<dyn PayoutLedger + Send + Sync>) {
        let intent = ledger.record_intent("app1", "task1", "wallet", 0.05).await.unwrap();
        assert_eq!(intent.state, PayoutState::Sending);
        assert!(intent.tx_signature.is_empty());
        assert!(ledger.record_intent("app1", "task1", "wallet", 0.05).await.is_err());

        ledger.attach_signature("app1", "sig0").await.unwrap();
        let intent = ledger.get("app1").await.unwrap().unwrap();
        assert_eq!(intent.state, PayoutState::Sending);
        assert_eq!(intent.tx_signature, "sig0");

        ledger
            .mark_unknown("app1", Some("sig1".into()), "timed out")
            .await
            .unwrap();
        let intent = ledger.get("app1").await.unwrap().unwrap();
        assert_eq!(intent.state, PayoutState::Unknown);
        assert_eq!(intent.tx_signature, "sig1");
        assert_eq!(intent.error_msg, "timed out");

        ledger.mark_unknown("app1", None, "still unknown").await.unwrap();
        let intent = ledger.get("app1").await.unwrap().unwrap();
        assert_eq!(intent.tx_signature, "sig1");

        ledger.mark_sent("app1", "sig2").await.unwrap();
        let intent = ledger.get("app1").await.unwrap().unwrap();
        assert_eq!(intent.state, PayoutState::Sent);
        assert_eq!(intent.tx_signature, "sig2");
        assert!(intent.error_msg.is_empty());

        ledger.mark_counted("app1").await.unwrap();
        let intent = ledger.get("app1").await.unwrap().unwrap();
        assert_eq!(intent.state, PayoutState::Counted);
        assert_eq!(intent.tx_signature, "sig2");

        ledger.record_intent("app2", "task1", "wallet", 0.05).await.unwrap();
        let ids: Vec<_> = ledger
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.application_id)
            .collect();
        assert_eq!(ids, vec!["app1", "app2"]);

        ledger.delete("app1").await.unwrap();
        assert!(ledger.get("app1").await.unwrap().is_none());
        assert!(ledger.mark_sent("app1", "sig").await.is_err());
        ledger.delete("app1").await.unwrap();
    }

    #[tokio::test]
    async fn db_ledger_lifecycle() {
        exercise(Arc::new(DbLedger::new(memory_db().await))).await;
    }

    #[tokio::test]
    async fn memory_ledger_lifecycle() {
        exercise(Arc::new(MemoryLedger::new())).await;
    }
}
