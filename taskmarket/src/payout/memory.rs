use crate::payout::{new_intent, PayoutIntent, PayoutLedger};
use crate::utils::IfNotFound;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use entity::PayoutState;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryLedger {
    intents: Mutex<HashMap<String, PayoutIntent>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, PayoutIntent>) -> Result<T>) -> Result<T> {
        let mut intents = self
            .intents
            .lock()
            .map_err(|_| anyhow!("memory ledger lock poisoned"))?;
        f(&mut intents)
    }

    fn update(&self, application_id: &str, f: impl FnOnce(&mut PayoutIntent)) -> Result<()> {
        self.with(|intents| {
            let intent = intents
                .get_mut(application_id)
                .if_not_found(format!("payout intent {}", application_id))?;
            f(intent);
            intent.update_at = Utc::now().timestamp();
            Ok(())
        })
    }
}

#[async_trait]
impl PayoutLedger for MemoryLedger {
    async fn record_intent(
        &self,
        application_id: &str,
        task_id: &str,
        wallet_address: &str,
        amount: f64,
    ) -> Result<PayoutIntent> {
        self.with(|intents| {
            if intents.contains_key(application_id) {
                bail!("payout for application {} is already in progress", application_id);
            }
            let intent = new_intent(application_id, task_id, wallet_address, amount);
            intents.insert(application_id.to_string(), intent.clone());
            Ok(intent)
        })
    }

    async fn mark_unknown(&self, application_id: &str, signature: Option<String>, reason: &str) -> Result<()> {
        self.update(application_id, |intent| {
            intent.state = PayoutState::Unknown;
            if let Some(signature) = signature {
                intent.tx_signature = signature;
            }
            intent.error_msg = reason.to_string();
        })
    }

    async fn attach_signature(&self, application_id: &str, signature: &str) -> Result<()> {
        self.update(application_id, |intent| {
            intent.tx_signature = signature.to_string();
        })
    }

    async fn mark_counted(&self, application_id: &str) -> Result<()> {
        self.update(application_id, |intent| intent.state = PayoutState::Counted)
    }

    async fn mark_sent(&self, application_id: &str, signature: &str) -> Result<()> {
        self.update(application_id, |intent| {
            intent.state = PayoutState::Sent;
            intent.tx_signature = signature.to_string();
            intent.error_msg.clear();
        })
    }

    async fn delete(&self, application_id: &str) -> Result<()> {
        self.with(|intents| {
            intents.remove(application_id);
            Ok(())
        })
    }

    async fn get(&self, application_id: &str) -> Result<Option<PayoutIntent>> {
        self.with(|intents| Ok(intents.get(application_id).cloned()))
    }

    async fn list(&self) -> Result<Vec<PayoutIntent>> {
        self.with(|intents| {
            let mut all: Vec<_> = intents.values().cloned().collect();
            all.sort_by(|a, b| {
                a.create_at
                    .cmp(&b.create_at)
                    .then_with(|| a.application_id.cmp(&b.application_id))
            });
            Ok(all)
        })
    }
}
