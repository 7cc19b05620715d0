//! Request handling for the three access tiers of the market.
//!
//! Credentials are checked before anything touches the payment gateway, input is validated
//! before anything is written.

use crate::chain::{is_valid_address, PaymentGateway};
use crate::config::MarketConfig;
use crate::models::*;
use crate::payout::{PayoutIntent, PayoutLedger};
use crate::repo::{KeyedLocks, MarketRepo};
use crate::resource::{self, ResourceRepo};
use crate::utils::Base64Byte;
use chrono::Utc;
use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

mod errors;
mod review;
#[cfg(test)]
mod tests;

pub use errors::{MarketError, MarketResult};
pub use review::ReconcileReport;

pub const API_KEY_PREFIX: &str = "tm_";
const API_KEY_LEN: usize = 40;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

pub fn generate_api_key() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", API_KEY_PREFIX, token)
}

fn same_secret(given: &str, expected: &str) -> bool {
    given.len() == expected.len()
        && given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn review_lock(application_id: &str) -> String {
    format!("review:{}", application_id)
}

fn task_lock(task_id: &str) -> String {
    format!("approve:{}", task_id)
}

fn registration_lock(wallet: &str) -> String {
    format!("register:{}", wallet)
}

pub struct Market {
    repo: MarketRepo,
    gateway: Arc<dyn PaymentGateway + Send + Sync>,
    ledger: Arc<dyn PayoutLedger + Send + Sync>,
    resource: Arc<dyn ResourceRepo + Send + Sync>,
    config: MarketConfig,
    locks: KeyedLocks,
}

impl Market {
    pub fn new(
        repo: MarketRepo,
        gateway: Arc<dyn PaymentGateway + Send + Sync>,
        ledger: Arc<dyn PayoutLedger + Send + Sync>,
        resource: Arc<dyn ResourceRepo + Send + Sync>,
        config: MarketConfig,
    ) -> Self {
        Market {
            repo,
            gateway,
            ledger,
            resource,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    // credentials

    /// Resolve an api key to an active agent
    pub async fn authenticate_agent(&self, api_key: &str) -> MarketResult<Agent> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(MarketError::Unauthorized("missing api key".into()));
        }
        let agent = self
            .repo
            .get_agent_by_api_key(api_key)
            .await?
            .ok_or_else(|| MarketError::Unauthorized("invalid api key".into()))?;
        if !agent.active {
            return Err(MarketError::Unauthorized(format!("agent {} is deactivated", agent.id)));
        }
        Ok(agent)
    }

    pub fn authorize_admin(&self, password: &str) -> MarketResult<()> {
        if self.config.admin_password.is_empty() {
            return Err(MarketError::Unauthorized("admin access is disabled".into()));
        }
        if !same_secret(password, &self.config.admin_password) {
            return Err(MarketError::Unauthorized("invalid admin password".into()));
        }
        Ok(())
    }

    // public

    pub async fn list_active_tasks(&self) -> MarketResult<Vec<Task>> {
        Ok(self.repo.list_active_tasks().await?)
    }

    pub async fn get_task(&self, id: &str) -> MarketResult<Task> {
        self.repo
            .get_task(id)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("task {}", id)))
    }

    pub async fn get_stats(&self) -> MarketResult<Stats> {
        Ok(self.repo.get_stats().await?)
    }

    pub async fn list_treasury_payouts(&self, limit: Option<usize>) -> MarketResult<Vec<TreasuryPayout>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.gateway.treasury_history(limit).await?)
    }

    pub async fn submit_application(&self, task_id: &str, wallet: &str, proof: &str) -> MarketResult<Application> {
        let wallet = wallet.trim();
        if !is_valid_address(wallet) {
            return Err(MarketError::invalid(format!("invalid wallet address {}", wallet)));
        }
        let proof = proof.trim();
        if proof.is_empty() {
            return Err(MarketError::invalid("proof must not be empty"));
        }

        let task = self.get_task(task_id).await?;
        if !task.active {
            return Err(MarketError::invalid(format!("task {} is not accepting applications", task.id)));
        }
        if !task.has_capacity() {
            return Err(MarketError::Capacity(task.id));
        }

        let application = Application {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            wallet_address: wallet.to_string(),
            proof_type: task.proof_type,
            proof_content: proof.to_string(),
            status: ApplicationStatus::Pending,
            submitted_at: Utc::now(),
            reviewed_at: None,
            paid_at: None,
            tx_signature: None,
        };
        self.repo.create_application(&application).await?;
        info!("application {} submitted for task {} by {}", application.id, task.id, wallet);
        Ok(application)
    }

    pub async fn upload_proof_image(&self, data: Base64Byte, content_type: &str) -> MarketResult<ProofImage> {
        let data: Vec<u8> = data.into();
        let (content_type, ext) =
            resource::validate_image(content_type, &data, self.config.max_upload_size).map_err(MarketError::invalid)?;
        let id = resource::image_id(&data, ext);
        let size = data.len();
        self.resource.store_resource(&id, content_type, data).await?;
        info!("stored proof image {} ({} bytes)", id, size);
        Ok(ProofImage {
            id,
            content_type: content_type.to_string(),
            size,
        })
    }

    pub async fn get_proof_image(&self, id: &str) -> MarketResult<Base64Byte> {
        resource::content_type_of(id).map_err(MarketError::invalid)?;
        if !self.resource.has_resource(id).await? {
            return Err(MarketError::not_found(format!("image {}", id)));
        }
        Ok(self.resource.get_resource(id).await?)
    }

    // agents

    /// Admit a new agent after checking its registration payment on chain
    pub async fn register_agent(&self, name: &str, wallet: &str, payment_signature: &str) -> MarketResult<Agent> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::invalid("name must not be empty"));
        }
        let wallet = wallet.trim();
        if !is_valid_address(wallet) {
            return Err(MarketError::invalid(format!("invalid wallet address {}", wallet)));
        }
        let payment_signature = payment_signature.trim();
        if payment_signature.is_empty() {
            return Err(MarketError::invalid("payment transaction signature must not be empty"));
        }

        let _guard = self.locks.lock(&registration_lock(wallet)).await;
        if self.repo.get_agent_by_wallet(wallet).await?.is_some() {
            return Err(MarketError::Conflict(format!("wallet {} is already registered", wallet)));
        }

        let verification = self
            .gateway
            .verify_transfer(
                payment_signature,
                wallet,
                &self.config.registration_address,
                self.config.registration_fee,
            )
            .await
            .map_err(|e| MarketError::Verification(format!("unable to check transaction: {}", e)))?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "payment rejected".to_string());
            warn!("registration of {} rejected: {}", wallet, reason);
            return Err(MarketError::Verification(reason));
        }

        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            wallet_address: wallet.to_string(),
            api_key: generate_api_key(),
            payment_tx_signature: payment_signature.to_string(),
            payment_amount: verification.amount,
            created_at: Utc::now(),
            active: true,
            tasks_created: 0,
        };
        self.repo.create_agent(&agent).await?;
        info!("agent {} ({}) registered with wallet {}", agent.id, agent.name, wallet);
        Ok(agent)
    }

    pub async fn agent_profile(&self, api_key: &str) -> MarketResult<Agent> {
        Ok(self.authenticate_agent(api_key).await?.redacted())
    }

    /// Tasks posted by the calling agent
    pub async fn agent_list_tasks(&self, api_key: &str) -> MarketResult<Vec<Task>> {
        let agent = self.authenticate_agent(api_key).await?;
        let mut tasks = self.repo.list_tasks().await?;
        tasks.retain(|t| t.created_by.as_deref() == Some(agent.id.as_str()));
        Ok(tasks)
    }

    pub async fn agent_get_task(&self, api_key: &str, id: &str) -> MarketResult<Task> {
        let agent = self.authenticate_agent(api_key).await?;
        match self.repo.get_task(id).await? {
            Some(task) if task.created_by.as_deref() == Some(agent.id.as_str()) => Ok(task),
            _ => Err(MarketError::not_found(format!("task {}", id))),
        }
    }

    pub async fn agent_create_task(&self, api_key: &str, new_task: NewTask) -> MarketResult<Task> {
        let agent = self.authenticate_agent(api_key).await?;
        new_task.validate().map_err(MarketError::invalid)?;
        let task = new_task.into_task(Uuid::new_v4().to_string(), Utc::now(), Some(agent.id.clone()));
        self.repo.create_task(&task).await?;
        self.repo.increment_agent_tasks_created(&agent.id).await?;
        info!("agent {} created task {} ({} SOL)", agent.id, task.id, task.reward);
        Ok(task)
    }

    pub async fn agent_apply(&self, api_key: &str, task_id: &str, wallet: &str, proof: &str) -> MarketResult<Application> {
        self.authenticate_agent(api_key).await?;
        self.submit_application(task_id, wallet, proof).await
    }

    // admin

    pub async fn admin_list_tasks(&self, password: &str) -> MarketResult<Vec<Task>> {
        self.authorize_admin(password)?;
        Ok(self.repo.list_tasks().await?)
    }

    pub async fn admin_create_task(&self, password: &str, new_task: NewTask) -> MarketResult<Task> {
        self.authorize_admin(password)?;
        new_task.validate().map_err(MarketError::invalid)?;
        let task = new_task.into_task(Uuid::new_v4().to_string(), Utc::now(), None);
        self.repo.create_task(&task).await?;
        info!("admin created task {} ({} SOL)", task.id, task.reward);
        Ok(task)
    }

    pub async fn admin_update_task(&self, password: &str, id: &str, patch: TaskPatch) -> MarketResult<Task> {
        self.authorize_admin(password)?;
        if patch.is_empty() {
            return Err(MarketError::invalid("nothing to update"));
        }
        // completions only move under this lock, so the max check in the patch is stable
        let _guard = self.locks.lock(&task_lock(id)).await;
        let mut candidate = self.get_task(id).await?;
        patch.clone().apply(&mut candidate).map_err(MarketError::invalid)?;
        let task = self
            .repo
            .update_task(id, patch)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("task {}", id)))?;
        info!("admin updated task {}", id);
        Ok(task)
    }

    pub async fn admin_delete_task(&self, password: &str, id: &str) -> MarketResult<bool> {
        self.authorize_admin(password)?;
        let _guard = self.locks.lock(&task_lock(id)).await;
        if !self.repo.delete_task(id).await? {
            return Err(MarketError::not_found(format!("task {}", id)));
        }
        info!("admin deleted task {}", id);
        Ok(true)
    }

    pub async fn admin_list_applications(
        &self,
        password: &str,
        status: Option<ApplicationStatus>,
        task_id: Option<&str>,
    ) -> MarketResult<Vec<Application>> {
        self.authorize_admin(password)?;
        Ok(self.repo.list_applications(status, task_id).await?)
    }

    pub async fn admin_review_application(
        &self,
        password: &str,
        id: &str,
        decision: ReviewDecision,
    ) -> MarketResult<Application> {
        self.authorize_admin(password)?;
        self.review_application(id, decision).await
    }

    pub async fn admin_list_agents(&self, password: &str) -> MarketResult<Vec<Agent>> {
        self.authorize_admin(password)?;
        let agents = self.repo.list_agents().await?;
        Ok(agents.into_iter().map(Agent::redacted).collect())
    }

    pub async fn admin_set_agent_active(&self, password: &str, id: &str, active: bool) -> MarketResult<Agent> {
        self.authorize_admin(password)?;
        let agent = self
            .repo
            .set_agent_active(id, active)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("agent {}", id)))?;
        info!("agent {} {}", id, if active { "activated" } else { "deactivated" });
        Ok(agent.redacted())
    }

    pub async fn admin_list_payout_intents(&self, password: &str) -> MarketResult<Vec<PayoutIntent>> {
        self.authorize_admin(password)?;
        Ok(self.ledger.list().await?)
    }

    pub async fn admin_resolve_payout(
        &self,
        password: &str,
        application_id: &str,
        signature: Option<String>,
    ) -> MarketResult<Application> {
        self.authorize_admin(password)?;
        self.resolve_payout(application_id, signature).await
    }
}
