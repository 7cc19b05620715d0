//! Records stored in the key-value store and exchanged over the api.
//!
//! Every record is serialized as camelCase json, the same bytes are written to the store and
//! returned to callers.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// What a worker has to hand in as proof of completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    TweetLink,
    Image,
    Link,
    Text,
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProofType::TweetLink => "tweet_link",
            ProofType::Image => "image",
            ProofType::Link => "link",
            ProofType::Text => "text",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ProofType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tweet_link" => Ok(ProofType::TweetLink),
            "image" => Ok(ProofType::Image),
            "link" => Ok(ProofType::Link),
            "text" => Ok(ProofType::Text),
            _ => Err(anyhow!("unknown proof type {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(anyhow!("unknown difficulty {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ApplicationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            _ => Err(anyhow!("unknown application status {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub proof_type: ProofType,
    pub reward: f64,
    pub difficulty: Difficulty,
    pub category: String,
    pub active: bool,
    pub total_completions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completions: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Agent that posted the task, absent for tasks created by an admin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Task {
    pub fn has_capacity(&self) -> bool {
        match self.max_completions {
            Some(max) => self.total_completions < max,
            None => true,
        }
    }
}

/// Caller supplied fields of a new task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub instructions: String,
    pub proof_type: ProofType,
    pub reward: f64,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub max_completions: Option<u32>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl NewTask {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(anyhow!("title must not be empty"));
        }
        if !self.reward.is_finite() || self.reward <= 0.0 {
            return Err(anyhow!("reward must be greater than zero"));
        }
        if self.max_completions == Some(0) {
            return Err(anyhow!("maxCompletions must be greater than zero"));
        }
        Ok(())
    }

    pub fn into_task(self, id: String, created_at: DateTime<Utc>, created_by: Option<String>) -> Task {
        let category = if self.category.trim().is_empty() {
            "general".to_string()
        } else {
            self.category
        };
        Task {
            id,
            title: self.title,
            description: self.description,
            instructions: self.instructions,
            proof_type: self.proof_type,
            reward: self.reward,
            difficulty: self.difficulty,
            category,
            active: self.active,
            total_completions: 0,
            max_completions: self.max_completions,
            created_at,
            created_by,
        }
    }
}

/// Partial task update, absent fields keep their stored value. The reward cannot change
/// once a task exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_type: Option<ProofType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completions: Option<u32>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// Merge onto `task`, checking the result still satisfies the task invariants
    pub fn apply(self, task: &mut Task) -> Result<()> {
        if let Some(title) = self.title {
            if title.trim().is_empty() {
                return Err(anyhow!("title must not be empty"));
            }
            task.title = title;
        }
        if let Some(max) = self.max_completions {
            if max == 0 || max < task.total_completions {
                return Err(anyhow!(
                    "maxCompletions {} is below the {} completions already paid",
                    max,
                    task.total_completions
                ));
            }
            task.max_completions = Some(max);
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(instructions) = self.instructions {
            task.instructions = instructions;
        }
        if let Some(proof_type) = self.proof_type {
            task.proof_type = proof_type;
        }
        if let Some(difficulty) = self.difficulty {
            task.difficulty = difficulty;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(active) = self.active {
            task.active = active;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub task_id: String,
    pub task_title: String,
    pub wallet_address: String,
    pub proof_type: ProofType,
    pub proof_content: String,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub wallet_address: String,
    pub api_key: String,
    pub payment_tx_signature: String,
    pub payment_amount: f64,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub tasks_created: u32,
}

impl Agent {
    /// Copy safe to hand out to anyone but the agent at registration time
    pub fn redacted(mut self) -> Self {
        self.api_key = redact_api_key(&self.api_key);
        self
    }
}

fn redact_api_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

pub const STAT_TOTAL_TASKS: &str = "totalTasks";
pub const STAT_TOTAL_APPLICATIONS: &str = "totalApplications";
pub const STAT_TOTAL_PAYOUTS: &str = "totalPayouts";
pub const STAT_TOTAL_AGENTS: &str = "totalAgents";
pub const STAT_TOTAL_COMPLETED_TASKS: &str = "totalCompletedTasks";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_tasks: u64,
    pub total_applications: u64,
    pub total_payouts: f64,
    pub total_agents: u64,
    pub total_completed_tasks: u64,
}

impl Stats {
    pub fn from_fields(fields: &HashMap<String, f64>) -> Self {
        let count = |name: &str| fields.get(name).copied().unwrap_or(0.0).max(0.0) as u64;
        Stats {
            total_tasks: count(STAT_TOTAL_TASKS),
            total_applications: count(STAT_TOTAL_APPLICATIONS),
            total_payouts: fields.get(STAT_TOTAL_PAYOUTS).copied().unwrap_or(0.0),
            total_agents: count(STAT_TOTAL_AGENTS),
            total_completed_tasks: count(STAT_TOTAL_COMPLETED_TASKS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Success,
    Failed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransferStatus::Success => write!(f, "success"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outgoing treasury transfer as seen on chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreasuryPayout {
    pub signature: String,
    pub to: String,
    pub amount: f64,
    /// Block time in unix seconds, unknown for very recent transactions
    pub timestamp: Option<i64>,
    pub status: TransferStatus,
}

/// Reference to an uploaded proof image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofImage {
    pub id: String,
    pub content_type: String,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        NewTask {
            title: "Follow us".into(),
            description: "follow the account".into(),
            instructions: "post the link".into(),
            proof_type: ProofType::TweetLink,
            reward: 0.05,
            difficulty: Difficulty::Easy,
            category: "".into(),
            max_completions: Some(2),
            active: true,
        }
        .into_task("t1".into(), Utc::now(), None)
    }

    #[test]
    fn task_json_is_camel_case() {
        let value = serde_json::to_value(task()).unwrap();
        assert_eq!(value["proofType"], "tweet_link");
        assert_eq!(value["totalCompletions"], 0);
        assert_eq!(value["maxCompletions"], 2);
        assert_eq!(value["category"], "general");
        assert!(value.get("createdBy").is_none());
    }

    #[test]
    fn new_task_validation() {
        let mut new_task = NewTask {
            title: " ".into(),
            description: "".into(),
            instructions: "".into(),
            proof_type: ProofType::Text,
            reward: 1.0,
            difficulty: Difficulty::Hard,
            category: "misc".into(),
            max_completions: None,
            active: true,
        };
        assert!(new_task.validate().is_err());
        new_task.title = "write".into();
        assert!(new_task.validate().is_ok());
        new_task.reward = 0.0;
        assert!(new_task.validate().is_err());
        new_task.reward = f64::NAN;
        assert!(new_task.validate().is_err());
        new_task.reward = 0.5;
        new_task.max_completions = Some(0);
        assert!(new_task.validate().is_err());
    }

    #[test]
    fn patch_keeps_unset_fields_and_checks_capacity() {
        let mut t = task();
        t.total_completions = 2;
        let patch = TaskPatch {
            title: Some("Retweet us".into()),
            active: Some(false),
            ..Default::default()
        };
        patch.apply(&mut t).unwrap();
        assert_eq!(t.title, "Retweet us");
        assert!(!t.active);
        assert_eq!(t.reward, 0.05);
        assert_eq!(t.id, "t1");

        let shrink = TaskPatch {
            max_completions: Some(1),
            ..Default::default()
        };
        assert!(shrink.apply(&mut t).is_err());
        assert_eq!(t.max_completions, Some(2));
    }

    #[test]
    fn capacity() {
        let mut t = task();
        assert!(t.has_capacity());
        t.total_completions = 2;
        assert!(!t.has_capacity());
        t.max_completions = None;
        assert!(t.has_capacity());
    }

    #[test]
    fn redaction_keeps_only_tail() {
        let agent = Agent {
            id: "a".into(),
            name: "bot".into(),
            wallet_address: "w".into(),
            api_key: "tm_abcdefghijklmnop".into(),
            payment_tx_signature: "sig".into(),
            payment_amount: 0.1,
            created_at: Utc::now(),
            active: true,
            tasks_created: 0,
        };
        assert_eq!(agent.redacted().api_key, "****mnop");
    }

    #[test]
    fn stats_from_missing_fields_are_zero() {
        let mut fields = HashMap::new();
        fields.insert(STAT_TOTAL_PAYOUTS.to_string(), 0.15);
        fields.insert(STAT_TOTAL_COMPLETED_TASKS.to_string(), 3.0);
        let stats = Stats::from_fields(&fields);
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.total_completed_tasks, 3);
        assert_eq!(stats.total_payouts, 0.15);
    }

    #[test]
    fn enum_strings_round_trip() {
        assert_eq!("tweet_link".parse::<ProofType>().unwrap(), ProofType::TweetLink);
        assert_eq!("pending".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::Pending);
        assert!("legendary".parse::<Difficulty>().is_err());
    }
}
