//! Maps tasks, applications, agents and stats onto the key-value store.
//!
//! Layout:
//! - `task:{id}`, `application:{id}`, `agent:{id}` hold the json records
//! - `tasks:all`, `tasks:active`, `applications:all`, `applications:pending`, `agents:all`
//!   and `task:{id}:applications` are index sets of ids
//! - `agent:apikey:{key}` and `agent:wallet:{address}` hold agent ids
//! - `stats` is a hash of the aggregate counters
//!
//! Read-modify-write updates of a record run under a per-record lock.

use crate::models::*;
use crate::store::KvStore;
use anyhow::{Context, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

mod locks;
pub use locks::KeyedLocks;

pub const TASKS_ALL: &str = "tasks:all";
pub const TASKS_ACTIVE: &str = "tasks:active";
pub const APPLICATIONS_ALL: &str = "applications:all";
pub const APPLICATIONS_PENDING: &str = "applications:pending";
pub const AGENTS_ALL: &str = "agents:all";
pub const STATS: &str = "stats";

pub fn task_key(id: &str) -> String {
    format!("task:{}", id)
}

pub fn task_applications_key(task_id: &str) -> String {
    format!("task:{}:applications", task_id)
}

pub fn application_key(id: &str) -> String {
    format!("application:{}", id)
}

pub fn agent_key(id: &str) -> String {
    format!("agent:{}", id)
}

pub fn agent_api_key_key(api_key: &str) -> String {
    format!("agent:apikey:{}", api_key)
}

pub fn agent_wallet_key(wallet: &str) -> String {
    format!("agent:wallet:{}", wallet)
}

pub struct MarketRepo {
    store: Arc<dyn KvStore + Send + Sync>,
    locks: KeyedLocks,
}

impl MarketRepo {
    pub fn new(store: Arc<dyn KvStore + Send + Sync>) -> Self {
        MarketRepo {
            store,
            locks: KeyedLocks::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("decode record {}", key))
                .map(Some),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).with_context(|| format!("encode record {}", key))?;
        self.store.set(key, raw).await
    }

    /// Load every record indexed by `set`, skipping ids whose record has disappeared
    async fn load_indexed<T: DeserializeOwned>(
        &self,
        set: &str,
        key_of: fn(&str) -> String,
    ) -> Result<Vec<T>> {
        let mut records = vec![];
        for id in self.store.set_members(set).await? {
            match self.get_json(&key_of(&id)).await? {
                Some(record) => records.push(record),
                None => warn!("index {} references missing record {}", set, id),
            }
        }
        Ok(records)
    }

    async fn bump_stat(&self, field: &str, amount: f64) -> Result<()> {
        self.store.hash_increment(STATS, field, amount).await.map(|_| ())
    }

    // tasks

    pub async fn create_task(&self, task: &Task) -> Result<()> {
        self.put_json(&task_key(&task.id), task).await?;
        self.store.set_add(TASKS_ALL, &task.id).await?;
        if task.active {
            self.store.set_add(TASKS_ACTIVE, &task.id).await?;
        }
        self.bump_stat(STAT_TOTAL_TASKS, 1.0).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.get_json(&task_key(id)).await
    }

    /// Merge `patch` onto the stored task. `Ok(None)` when the task does not exist.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Option<Task>> {
        let key = task_key(id);
        let _guard = self.locks.lock(&key).await;
        let mut task: Task = match self.get_json(&key).await? {
            Some(task) => task,
            None => return Ok(None),
        };
        patch.apply(&mut task)?;
        self.put_json(&key, &task).await?;
        if task.active {
            self.store.set_add(TASKS_ACTIVE, id).await?;
        } else {
            self.store.set_remove(TASKS_ACTIVE, id).await?;
        }
        Ok(Some(task))
    }

    /// Remove the task and its index entries. Applications that reference it are kept.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        let key = task_key(id);
        let _guard = self.locks.lock(&key).await;
        if self.store.get(&key).await?.is_none() {
            return Ok(false);
        }
        self.store.delete(&key).await?;
        self.store.set_remove(TASKS_ALL, id).await?;
        self.store.set_remove(TASKS_ACTIVE, id).await?;
        Ok(true)
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.load_indexed(TASKS_ALL, task_key).await?;
        sort_newest_first(&mut tasks, |t| (t.created_at, t.id.clone()));
        Ok(tasks)
    }

    pub async fn list_active_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.load_indexed(TASKS_ACTIVE, task_key).await?;
        tasks.retain(|t| t.active);
        sort_newest_first(&mut tasks, |t| (t.created_at, t.id.clone()));
        Ok(tasks)
    }

    pub async fn increment_task_completions(&self, id: &str) -> Result<Option<Task>> {
        let key = task_key(id);
        let _guard = self.locks.lock(&key).await;
        let mut task: Task = match self.get_json(&key).await? {
            Some(task) => task,
            None => return Ok(None),
        };
        task.total_completions += 1;
        self.put_json(&key, &task).await?;
        Ok(Some(task))
    }

    // applications

    pub async fn create_application(&self, application: &Application) -> Result<()> {
        self.put_json(&application_key(&application.id), application)
            .await?;
        self.store
            .set_add(APPLICATIONS_ALL, &application.id)
            .await?;
        self.store
            .set_add(APPLICATIONS_PENDING, &application.id)
            .await?;
        self.store
            .set_add(&task_applications_key(&application.task_id), &application.id)
            .await?;
        self.bump_stat(STAT_TOTAL_APPLICATIONS, 1.0).await
    }

    pub async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        self.get_json(&application_key(id)).await
    }

    /// Persist a decided application and drop it from the pending index
    pub async fn save_reviewed_application(&self, application: &Application) -> Result<()> {
        self.put_json(&application_key(&application.id), application)
            .await?;
        if application.status != ApplicationStatus::Pending {
            self.store
                .set_remove(APPLICATIONS_PENDING, &application.id)
                .await?;
        }
        Ok(())
    }

    pub async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
        task_id: Option<&str>,
    ) -> Result<Vec<Application>> {
        let set = match (task_id, status) {
            (Some(task_id), _) => task_applications_key(task_id),
            (None, Some(ApplicationStatus::Pending)) => APPLICATIONS_PENDING.to_string(),
            (None, _) => APPLICATIONS_ALL.to_string(),
        };
        let mut applications: Vec<Application> =
            self.load_indexed(&set, application_key).await?;
        if let Some(status) = status {
            applications.retain(|a| a.status == status);
        }
        sort_newest_first(&mut applications, |a| (a.submitted_at, a.id.clone()));
        Ok(applications)
    }

    // agents

    pub async fn create_agent(&self, agent: &Agent) -> Result<()> {
        self.put_json(&agent_key(&agent.id), agent).await?;
        self.store
            .set(&agent_api_key_key(&agent.api_key), agent.id.clone())
            .await?;
        self.store
            .set(&agent_wallet_key(&agent.wallet_address), agent.id.clone())
            .await?;
        self.store.set_add(AGENTS_ALL, &agent.id).await?;
        self.bump_stat(STAT_TOTAL_AGENTS, 1.0).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.get_json(&agent_key(id)).await
    }

    pub async fn get_agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        match self.store.get(&agent_api_key_key(api_key)).await? {
            Some(id) => self.get_agent(&id).await,
            None => Ok(None),
        }
    }

    pub async fn get_agent_by_wallet(&self, wallet: &str) -> Result<Option<Agent>> {
        match self.store.get(&agent_wallet_key(wallet)).await? {
            Some(id) => self.get_agent(&id).await,
            None => Ok(None),
        }
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.load_indexed(AGENTS_ALL, agent_key).await?;
        sort_newest_first(&mut agents, |a| (a.created_at, a.id.clone()));
        Ok(agents)
    }

    pub async fn set_agent_active(&self, id: &str, active: bool) -> Result<Option<Agent>> {
        self.update_agent(id, |agent| agent.active = active).await
    }

    pub async fn increment_agent_tasks_created(&self, id: &str) -> Result<Option<Agent>> {
        self.update_agent(id, |agent| agent.tasks_created += 1)
            .await
    }

    async fn update_agent(&self, id: &str, change: impl FnOnce(&mut Agent)) -> Result<Option<Agent>> {
        let key = agent_key(id);
        let _guard = self.locks.lock(&key).await;
        let mut agent: Agent = match self.get_json(&key).await? {
            Some(agent) => agent,
            None => return Ok(None),
        };
        change(&mut agent);
        self.put_json(&key, &agent).await?;
        Ok(Some(agent))
    }

    // stats

    /// Count one paid completion worth `reward`
    pub async fn record_payout(&self, reward: f64) -> Result<()> {
        self.bump_stat(STAT_TOTAL_PAYOUTS, reward).await?;
        self.bump_stat(STAT_TOTAL_COMPLETED_TASKS, 1.0).await
    }

    pub async fn get_stats(&self) -> Result<Stats> {
        let fields = self.store.hash_get_all(STATS).await?;
        Ok(Stats::from_fields(&fields))
    }
}

fn sort_newest_first<T, K: Ord>(records: &mut [T], key: impl Fn(&T) -> K) {
    records.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn repo() -> (Arc<MemoryStore>, MarketRepo) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), MarketRepo::new(store))
    }

    fn task(id: &str, minutes_ago: i64, active: bool) -> Task {
        Task {
            id: id.into(),
            title: format!("task {}", id),
            description: "d".into(),
            instructions: "i".into(),
            proof_type: ProofType::Link,
            reward: 0.01,
            difficulty: Difficulty::Medium,
            category: "general".into(),
            active,
            total_completions: 0,
            max_completions: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
            created_by: None,
        }
    }

    fn application(id: &str, task_id: &str, minutes_ago: i64) -> Application {
        Application {
            id: id.into(),
            task_id: task_id.into(),
            task_title: "t".into(),
            wallet_address: "wallet".into(),
            proof_type: ProofType::Link,
            proof_content: "https://example.com".into(),
            status: ApplicationStatus::Pending,
            submitted_at: Utc::now() - Duration::minutes(minutes_ago),
            reviewed_at: None,
            paid_at: None,
            tx_signature: None,
        }
    }

    #[tokio::test]
    async fn task_layout_and_order() {
        let (store, repo) = repo();
        repo.create_task(&task("old", 10, true)).await.unwrap();
        repo.create_task(&task("new", 1, true)).await.unwrap();
        repo.create_task(&task("hidden", 5, false)).await.unwrap();

        assert!(store.get("task:old").await.unwrap().is_some());
        assert_eq!(store.set_members(TASKS_ALL).await.unwrap().len(), 3);
        assert_eq!(store.set_members(TASKS_ACTIVE).await.unwrap(), vec!["new", "old"]);

        let ids: Vec<String> = repo.list_tasks().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["new", "hidden", "old"]);
        let active: Vec<String> = repo
            .list_active_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec!["new", "old"]);
        assert_eq!(repo.get_stats().await.unwrap().total_tasks, 3);
    }

    #[tokio::test]
    async fn update_syncs_active_index() {
        let (store, repo) = repo();
        repo.create_task(&task("a", 1, true)).await.unwrap();
        let patch = TaskPatch {
            active: Some(false),
            ..Default::default()
        };
        let updated = repo.update_task("a", patch).await.unwrap().unwrap();
        assert_eq!(updated.id, "a");
        assert!(store.set_members(TASKS_ACTIVE).await.unwrap().is_empty());
        assert!(repo.update_task("missing", TaskPatch::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_keeps_applications() {
        let (store, repo) = repo();
        repo.create_task(&task("a", 1, true)).await.unwrap();
        repo.create_application(&application("x", "a", 1)).await.unwrap();
        assert!(repo.delete_task("a").await.unwrap());
        assert!(!repo.delete_task("a").await.unwrap());
        assert!(repo.get_task("a").await.unwrap().is_none());
        assert!(store.set_members(TASKS_ALL).await.unwrap().is_empty());
        assert!(store.set_members(TASKS_ACTIVE).await.unwrap().is_empty());
        assert!(repo.get_application("x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_completion_increments_are_serialized() {
        let (_, repo) = repo();
        let repo = Arc::new(repo);
        repo.create_task(&task("a", 1, true)).await.unwrap();
        let mut handles = vec![];
        for _ in 0..25 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.increment_task_completions("a").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(repo.get_task("a").await.unwrap().unwrap().total_completions, 25);
    }

    #[tokio::test]
    async fn application_indexes() {
        let (store, repo) = repo();
        repo.create_application(&application("x", "a", 3)).await.unwrap();
        repo.create_application(&application("y", "a", 2)).await.unwrap();
        repo.create_application(&application("z", "b", 1)).await.unwrap();

        let mut reviewed = repo.get_application("x").await.unwrap().unwrap();
        reviewed.status = ApplicationStatus::Rejected;
        repo.save_reviewed_application(&reviewed).await.unwrap();

        assert_eq!(store.set_members(APPLICATIONS_PENDING).await.unwrap(), vec!["y", "z"]);
        let for_a: Vec<String> = repo
            .list_applications(None, Some("a"))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(for_a, vec!["y", "x"]);
        let pending = repo
            .list_applications(Some(ApplicationStatus::Pending), None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        let rejected = repo
            .list_applications(Some(ApplicationStatus::Rejected), None)
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(repo.get_stats().await.unwrap().total_applications, 3);
    }

    #[tokio::test]
    async fn agent_lookups() {
        let (_, repo) = repo();
        let agent = Agent {
            id: "ag".into(),
            name: "bot".into(),
            wallet_address: "W1".into(),
            api_key: "tm_key".into(),
            payment_tx_signature: "sig".into(),
            payment_amount: 0.1,
            created_at: Utc::now(),
            active: true,
            tasks_created: 0,
        };
        repo.create_agent(&agent).await.unwrap();
        assert_eq!(repo.get_agent_by_api_key("tm_key").await.unwrap().unwrap().id, "ag");
        assert_eq!(repo.get_agent_by_wallet("W1").await.unwrap().unwrap().id, "ag");
        assert!(repo.get_agent_by_wallet("W2").await.unwrap().is_none());

        repo.increment_agent_tasks_created("ag").await.unwrap();
        let agent = repo.set_agent_active("ag", false).await.unwrap().unwrap();
        assert_eq!(agent.tasks_created, 1);
        assert!(!agent.active);
        assert_eq!(agent.api_key, "tm_key");
        assert_eq!(repo.get_stats().await.unwrap().total_agents, 1);
    }

    #[tokio::test]
    async fn payouts_accumulate() {
        let (_, repo) = repo();
        repo.record_payout(0.05).await.unwrap();
        repo.record_payout(0.25).await.unwrap();
        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.total_completed_tasks, 2);
        assert!((stats.total_payouts - 0.30).abs() < 1e-9);
    }
}
