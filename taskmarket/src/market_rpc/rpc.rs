use crate::models::*;
use crate::payout::PayoutIntent;
use crate::service::{Market, MarketError, MarketResult};
use crate::utils::{Base64Byte, IntoAnyhow};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::RpcModule;
use log::error;
use std::sync::Arc;

#[rpc(server, client)]
pub trait MarketRpc {
    #[method(name = "Market.ListActiveTasks")]
    async fn list_active_tasks(&self) -> RpcResult<Vec<Task>>;

    #[method(name = "Market.GetTask")]
    async fn get_task(&self, id: String) -> RpcResult<Task>;

    #[method(name = "Market.GetStats")]
    async fn get_stats(&self) -> RpcResult<Stats>;

    #[method(name = "Market.ListTreasuryPayouts")]
    async fn list_treasury_payouts(&self, limit: Option<usize>) -> RpcResult<Vec<TreasuryPayout>>;

    #[method(name = "Market.SubmitApplication")]
    async fn submit_application(
        &self,
        task_id: String,
        wallet_address: String,
        proof: String,
    ) -> RpcResult<Application>;

    #[method(name = "Market.UploadProofImage")]
    async fn upload_proof_image(&self, data: Base64Byte, content_type: String) -> RpcResult<ProofImage>;

    #[method(name = "Market.GetProofImage")]
    async fn get_proof_image(&self, id: String) -> RpcResult<Base64Byte>;

    #[method(name = "Agent.Register")]
    async fn register_agent(
        &self,
        name: String,
        wallet_address: String,
        payment_signature: String,
    ) -> RpcResult<Agent>;

    #[method(name = "Agent.Profile")]
    async fn agent_profile(&self, api_key: String) -> RpcResult<Agent>;

    #[method(name = "Agent.ListTasks")]
    async fn agent_list_tasks(&self, api_key: String) -> RpcResult<Vec<Task>>;

    #[method(name = "Agent.GetTask")]
    async fn agent_get_task(&self, api_key: String, id: String) -> RpcResult<Task>;

    #[method(name = "Agent.CreateTask")]
    async fn agent_create_task(&self, api_key: String, task: NewTask) -> RpcResult<Task>;

    #[method(name = "Agent.Apply")]
    async fn agent_apply(
        &self,
        api_key: String,
        task_id: String,
        wallet_address: String,
        proof: String,
    ) -> RpcResult<Application>;

    #[method(name = "Admin.ListTasks")]
    async fn admin_list_tasks(&self, admin_password: String) -> RpcResult<Vec<Task>>;

    #[method(name = "Admin.CreateTask")]
    async fn admin_create_task(&self, admin_password: String, task: NewTask) -> RpcResult<Task>;

    #[method(name = "Admin.UpdateTask")]
    async fn admin_update_task(&self, admin_password: String, id: String, patch: TaskPatch) -> RpcResult<Task>;

    #[method(name = "Admin.DeleteTask")]
    async fn admin_delete_task(&self, admin_password: String, id: String) -> RpcResult<bool>;

    #[method(name = "Admin.ListApplications")]
    async fn admin_list_applications(
        &self,
        admin_password: String,
        status: Option<ApplicationStatus>,
        task_id: Option<String>,
    ) -> RpcResult<Vec<Application>>;

    #[method(name = "Admin.ReviewApplication")]
    async fn admin_review_application(
        &self,
        admin_password: String,
        id: String,
        decision: ReviewDecision,
    ) -> RpcResult<Application>;

    #[method(name = "Admin.ListAgents")]
    async fn admin_list_agents(&self, admin_password: String) -> RpcResult<Vec<Agent>>;

    #[method(name = "Admin.SetAgentActive")]
    async fn admin_set_agent_active(&self, admin_password: String, id: String, active: bool) -> RpcResult<Agent>;

    #[method(name = "Admin.ListPayoutIntents")]
    async fn admin_list_payout_intents(&self, admin_password: String) -> RpcResult<Vec<PayoutIntent>>;

    #[method(name = "Admin.ResolvePayout")]
    async fn admin_resolve_payout(
        &self,
        admin_password: String,
        application_id: String,
        signature: Option<String>,
    ) -> RpcResult<Application>;
}

/// Convert service errors for the wire, internal causes are only logged
pub trait IntoRpcResult<T> {
    fn rpc(self) -> RpcResult<T>;
}

impl<T> IntoRpcResult<T> for MarketResult<T> {
    fn rpc(self) -> RpcResult<T> {
        self.map_err(|e| {
            if let MarketError::Internal(cause) = &e {
                error!("internal error: {:?}", cause);
            }
            jsonrpsee::core::Error::Custom(e.public_message())
        })
    }
}

pub struct MarketImpl {
    market: Arc<Market>,
}

#[async_trait]
impl MarketRpcServer for MarketImpl {
    async fn list_active_tasks(&self) -> RpcResult<Vec<Task>> {
        self.market.list_active_tasks().await.rpc()
    }

    async fn get_task(&self, id: String) -> RpcResult<Task> {
        self.market.get_task(&id).await.rpc()
    }

    async fn get_stats(&self) -> RpcResult<Stats> {
        self.market.get_stats().await.rpc()
    }

    async fn list_treasury_payouts(&self, limit: Option<usize>) -> RpcResult<Vec<TreasuryPayout>> {
        self.market.list_treasury_payouts(limit).await.rpc()
    }

    async fn submit_application(
        &self,
        task_id: String,
        wallet_address: String,
        proof: String,
    ) -> RpcResult<Application> {
        self.market
            .submit_application(&task_id, &wallet_address, &proof)
            .await
            .rpc()
    }

    async fn upload_proof_image(&self, data: Base64Byte, content_type: String) -> RpcResult<ProofImage> {
        self.market.upload_proof_image(data, &content_type).await.rpc()
    }

    async fn get_proof_image(&self, id: String) -> RpcResult<Base64Byte> {
        self.market.get_proof_image(&id).await.rpc()
    }

    async fn register_agent(
        &self,
        name: String,
        wallet_address: String,
        payment_signature: String,
    ) -> RpcResult<Agent> {
        self.market
            .register_agent(&name, &wallet_address, &payment_signature)
            .await
            .rpc()
    }

    async fn agent_profile(&self, api_key: String) -> RpcResult<Agent> {
        self.market.agent_profile(&api_key).await.rpc()
    }

    async fn agent_list_tasks(&self, api_key: String) -> RpcResult<Vec<Task>> {
        self.market.agent_list_tasks(&api_key).await.rpc()
    }

    async fn agent_get_task(&self, api_key: String, id: String) -> RpcResult<Task> {
        self.market.agent_get_task(&api_key, &id).await.rpc()
    }

    async fn agent_create_task(&self, api_key: String, task: NewTask) -> RpcResult<Task> {
        self.market.agent_create_task(&api_key, task).await.rpc()
    }

    async fn agent_apply(
        &self,
        api_key: String,
        task_id: String,
        wallet_address: String,
        proof: String,
    ) -> RpcResult<Application> {
        self.market
            .agent_apply(&api_key, &task_id, &wallet_address, &proof)
            .await
            .rpc()
    }

    async fn admin_list_tasks(&self, admin_password: String) -> RpcResult<Vec<Task>> {
        self.market.admin_list_tasks(&admin_password).await.rpc()
    }

    async fn admin_create_task(&self, admin_password: String, task: NewTask) -> RpcResult<Task> {
        self.market.admin_create_task(&admin_password, task).await.rpc()
    }

    async fn admin_update_task(&self, admin_password: String, id: String, patch: TaskPatch) -> RpcResult<Task> {
        self.market
            .admin_update_task(&admin_password, &id, patch)
            .await
            .rpc()
    }

    async fn admin_delete_task(&self, admin_password: String, id: String) -> RpcResult<bool> {
        self.market.admin_delete_task(&admin_password, &id).await.rpc()
    }

    async fn admin_list_applications(
        &self,
        admin_password: String,
        status: Option<ApplicationStatus>,
        task_id: Option<String>,
    ) -> RpcResult<Vec<Application>> {
        self.market
            .admin_list_applications(&admin_password, status, task_id.as_deref())
            .await
            .rpc()
    }

    async fn admin_review_application(
        &self,
        admin_password: String,
        id: String,
        decision: ReviewDecision,
    ) -> RpcResult<Application> {
        self.market
            .admin_review_application(&admin_password, &id, decision)
            .await
            .rpc()
    }

    async fn admin_list_agents(&self, admin_password: String) -> RpcResult<Vec<Agent>> {
        self.market.admin_list_agents(&admin_password).await.rpc()
    }

    async fn admin_set_agent_active(&self, admin_password: String, id: String, active: bool) -> RpcResult<Agent> {
        self.market
            .admin_set_agent_active(&admin_password, &id, active)
            .await
            .rpc()
    }

    async fn admin_list_payout_intents(&self, admin_password: String) -> RpcResult<Vec<PayoutIntent>> {
        self.market.admin_list_payout_intents(&admin_password).await.rpc()
    }

    async fn admin_resolve_payout(
        &self,
        admin_password: String,
        application_id: String,
        signature: Option<String>,
    ) -> RpcResult<Application> {
        self.market
            .admin_resolve_payout(&admin_password, &application_id, signature)
            .await
            .rpc()
    }
}

pub fn register(market: Arc<Market>) -> RpcModule<MarketImpl> {
    MarketImpl { market }.into_rpc()
}

/// Largest response the client accepts, proof images travel base64 encoded
pub const CLIENT_MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// get market api by url, `http://` is assumed when no scheme is given
pub async fn get_market_api(url: String) -> anyhow::Result<WrapClient> {
    let url = if url.contains("://") {
        url
    } else {
        format!("http://{}", url)
    };
    HttpClientBuilder::default()
        .max_request_body_size(CLIENT_MAX_BODY_SIZE)
        .build(url.as_str())
        .map(|client| WrapClient { client })
        .anyhow()
}

/// WrapClient for rpc error, convert RpcResult to anyhow Result
pub struct WrapClient {
    client: HttpClient,
}

/// Operator side of the api, used by the cli
#[async_trait]
pub trait MarketServiceClient {
    async fn list_active_tasks(&self) -> anyhow::Result<Vec<Task>>;
    async fn get_task(&self, id: String) -> anyhow::Result<Task>;
    async fn get_stats(&self) -> anyhow::Result<Stats>;
    async fn list_treasury_payouts(&self, limit: Option<usize>) -> anyhow::Result<Vec<TreasuryPayout>>;

    async fn admin_list_tasks(&self, admin_password: String) -> anyhow::Result<Vec<Task>>;
    async fn admin_create_task(&self, admin_password: String, task: NewTask) -> anyhow::Result<Task>;
    async fn admin_update_task(&self, admin_password: String, id: String, patch: TaskPatch) -> anyhow::Result<Task>;
    async fn admin_delete_task(&self, admin_password: String, id: String) -> anyhow::Result<bool>;
    async fn admin_list_applications(
        &self,
        admin_password: String,
        status: Option<ApplicationStatus>,
        task_id: Option<String>,
    ) -> anyhow::Result<Vec<Application>>;
    async fn admin_review_application(
        &self,
        admin_password: String,
        id: String,
        decision: ReviewDecision,
    ) -> anyhow::Result<Application>;
    async fn admin_list_agents(&self, admin_password: String) -> anyhow::Result<Vec<Agent>>;
    async fn admin_set_agent_active(&self, admin_password: String, id: String, active: bool) -> anyhow::Result<Agent>;
    async fn admin_list_payout_intents(&self, admin_password: String) -> anyhow::Result<Vec<PayoutIntent>>;
    async fn admin_resolve_payout(
        &self,
        admin_password: String,
        application_id: String,
        signature: Option<String>,
    ) -> anyhow::Result<Application>;
}

#[async_trait]
impl MarketServiceClient for WrapClient {
    async fn list_active_tasks(&self) -> anyhow::Result<Vec<Task>> {
        self.client.list_active_tasks().await.anyhow()
    }

    async fn get_task(&self, id: String) -> anyhow::Result<Task> {
        self.client.get_task(id).await.anyhow()
    }

    async fn get_stats(&self) -> anyhow::Result<Stats> {
        self.client.get_stats().await.anyhow()
    }

    async fn list_treasury_payouts(&self, limit: Option<usize>) -> anyhow::Result<Vec<TreasuryPayout>> {
        self.client.list_treasury_payouts(limit).await.anyhow()
    }

    async fn admin_list_tasks(&self, admin_password: String) -> anyhow::Result<Vec<Task>> {
        self.client.admin_list_tasks(admin_password).await.anyhow()
    }

    async fn admin_create_task(&self, admin_password: String, task: NewTask) -> anyhow::Result<Task> {
        self.client
            .admin_create_task(admin_password, task)
            .await
            .anyhow()
    }

    async fn admin_update_task(&self, admin_password: String, id: String, patch: TaskPatch) -> anyhow::Result<Task> {
        self.client
            .admin_update_task(admin_password, id, patch)
            .await
            .anyhow()
    }

    async fn admin_delete_task(&self, admin_password: String, id: String) -> anyhow::Result<bool> {
        self.client
            .admin_delete_task(admin_password, id)
            .await
            .anyhow()
    }

    async fn admin_list_applications(
        &self,
        admin_password: String,
        status: Option<ApplicationStatus>,
        task_id: Option<String>,
    ) -> anyhow::Result<Vec<Application>> {
        self.client
            .admin_list_applications(admin_password, status, task_id)
            .await
            .anyhow()
    }

    async fn admin_review_application(
        &self,
        admin_password: String,
        id: String,
        decision: ReviewDecision,
    ) -> anyhow::Result<Application> {
        self.client
            .admin_review_application(admin_password, id, decision)
            .await
            .anyhow()
    }

    async fn admin_list_agents(&self, admin_password: String) -> anyhow::Result<Vec<Agent>> {
        self.client.admin_list_agents(admin_password).await.anyhow()
    }

    async fn admin_set_agent_active(&self, admin_password: String, id: String, active: bool) -> anyhow::Result<Agent> {
        self.client
            .admin_set_agent_active(admin_password, id, active)
            .await
            .anyhow()
    }

    async fn admin_list_payout_intents(&self, admin_password: String) -> anyhow::Result<Vec<PayoutIntent>> {
        self.client
            .admin_list_payout_intents(admin_password)
            .await
            .anyhow()
    }

    async fn admin_resolve_payout(
        &self,
        admin_password: String,
        application_id: String,
        signature: Option<String>,
    ) -> anyhow::Result<Application> {
        self.client
            .admin_resolve_payout(admin_password, application_id, signature)
            .await
            .anyhow()
    }
}
