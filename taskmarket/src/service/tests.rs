use super::*;
use crate::chain::{PaymentError, PaymentReceipt, SignatureStatus, SubmittedPayment, TransferVerification};
use crate::config::DEFAULT_MAX_UPLOAD_SIZE;
use crate::payout::MemoryLedger;
use crate::resource::FileResource;
use crate::store::{KvStore, MemoryStore};
use anyhow::Result;
use async_trait::async_trait;
use entity::PayoutState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const ADMIN: &str = "admin-pass";

#[derive(Clone, Copy, PartialEq)]
enum Outcome {
    Succeed,
    Fail,
    Unknown,
}

struct FakeGateway {
    outcome: Mutex<Outcome>,
    submit_delay: Duration,
    delay: Duration,
    payments: Mutex<Vec<(String, f64)>>,
    verification: Mutex<TransferVerification>,
    verify_calls: Mutex<usize>,
    statuses: Mutex<HashMap<String, SignatureStatus>>,
}

impl FakeGateway {
    fn new() -> Self {
        FakeGateway {
            outcome: Mutex::new(Outcome::Succeed),
            submit_delay: Duration::from_millis(0),
            delay: Duration::from_millis(0),
            payments: Mutex::new(vec![]),
            verification: Mutex::new(TransferVerification::accepted(0.1)),
            verify_calls: Mutex::new(0),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Time between submission and the outcome
    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    fn set_status(&self, signature: &str, status: SignatureStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(signature.to_string(), status);
    }

    fn payments(&self) -> Vec<(String, f64)> {
        self.payments.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn submit_payment(&self, to: &str, amount: f64) -> Result<SubmittedPayment, PaymentError> {
        tokio::time::sleep(self.submit_delay).await;
        let n = {
            let mut payments = self.payments.lock().unwrap();
            payments.push((to.to_string(), amount));
            payments.len()
        };
        Ok(SubmittedPayment {
            signature: format!("sig{}", n),
            last_valid_height: 0,
        })
    }

    async fn await_payment(&self, payment: &SubmittedPayment) -> Result<PaymentReceipt, PaymentError> {
        tokio::time::sleep(self.delay).await;
        let signature = payment.signature.clone();
        let outcome = *self.outcome.lock().unwrap();
        match outcome {
            Outcome::Succeed => Ok(PaymentReceipt { signature }),
            Outcome::Fail => Err(PaymentError::Failed("insufficient funds".into())),
            Outcome::Unknown => Err(PaymentError::Unknown {
                signature: Some(signature),
                reason: "not confirmed".into(),
            }),
        }
    }

    async fn verify_transfer(&self, _signature: &str, _from: &str, _to: &str, _min: f64) -> Result<TransferVerification> {
        *self.verify_calls.lock().unwrap() += 1;
        Ok(self.verification.lock().unwrap().clone())
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(signature)
            .copied()
            .unwrap_or(SignatureStatus::NotFound))
    }

    async fn treasury_history(&self, limit: usize) -> Result<Vec<TreasuryPayout>> {
        Ok(self
            .payments()
            .into_iter()
            .rev()
            .take(limit)
            .enumerate()
            .map(|(i, (to, amount))| TreasuryPayout {
                signature: format!("sig{}", i),
                to,
                amount,
                timestamp: None,
                status: TransferStatus::Success,
            })
            .collect())
    }
}

/// Memory store that can refuse to persist approved applications
struct FlakyStore {
    inner: MemoryStore,
    reject_approvals: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        FlakyStore {
            inner: MemoryStore::new(),
            reject_approvals: AtomicBool::new(false),
        }
    }

    fn reject_approvals(&self, reject: bool) {
        self.reject_approvals.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        if self.reject_approvals.load(Ordering::SeqCst)
            && key.starts_with("application:")
            && value.contains("\"status\":\"approved\"")
        {
            anyhow::bail!("disk full");
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        self.inner.set_add(set, member).await
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        self.inner.set_remove(set, member).await
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        self.inner.set_members(set).await
    }

    async fn hash_increment(&self, hash: &str, field: &str, amount: f64) -> Result<f64> {
        self.inner.hash_increment(hash, field, amount).await
    }

    async fn hash_get_all(&self, hash: &str) -> Result<HashMap<String, f64>> {
        self.inner.hash_get_all(hash).await
    }
}

struct Fixture {
    market: Arc<Market>,
    gateway: Arc<FakeGateway>,
    ledger: Arc<MemoryLedger>,
}

fn fixture_with(gateway: FakeGateway, payment_timeout: Duration) -> Fixture {
    fixture_on(Arc::new(MemoryStore::new()), gateway, payment_timeout)
}

fn fixture_on(store: Arc<dyn KvStore + Send + Sync>, gateway: FakeGateway, payment_timeout: Duration) -> Fixture {
    let gateway = Arc::new(gateway);
    let ledger = Arc::new(MemoryLedger::new());
    let root = std::env::temp_dir().join(Uuid::new_v4().to_string());
    let config = MarketConfig::new(
        ADMIN.into(),
        wallet(200),
        0.1,
        DEFAULT_MAX_UPLOAD_SIZE,
        payment_timeout,
    );
    let market = Market::new(
        MarketRepo::new(store),
        gateway.clone(),
        ledger.clone(),
        Arc::new(FileResource::new(root)),
        config,
    );
    Fixture {
        market: Arc::new(market),
        gateway,
        ledger,
    }
}

fn fixture() -> Fixture {
    fixture_with(FakeGateway::new(), Duration::from_secs(5))
}

fn wallet(n: u8) -> String {
    bs58::encode([n; 32]).into_string()
}

fn new_task(reward: f64, max: Option<u32>) -> NewTask {
    NewTask {
        title: "Share the launch post".into(),
        description: "retweet the announcement".into(),
        instructions: "paste the tweet link".into(),
        proof_type: ProofType::TweetLink,
        reward,
        difficulty: Difficulty::Easy,
        category: "social".into(),
        max_completions: max,
        active: true,
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

async fn apply(f: &Fixture, task: &Task, n: u8) -> Application {
    f.market
        .submit_application(&task.id, &wallet(n), "https://x.com/status/1")
        .await
        .unwrap()
}

#[tokio::test]
async fn approval_pays_and_fills_capacity() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, Some(1))).await.unwrap();
    let application = apply(&f, &task, 1).await;
    assert_eq!(application.status, ApplicationStatus::Pending);
    assert_eq!(application.task_title, task.title);

    let approved = f
        .market
        .admin_review_application(ADMIN, &application.id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(approved.status, ApplicationStatus::Approved);
    assert_eq!(approved.tx_signature.as_deref(), Some("sig1"));
    assert!(approved.paid_at.is_some() && approved.reviewed_at.is_some());
    assert_eq!(f.gateway.payments(), vec![(wallet(1), 0.05)]);
    assert_eq!(f.market.get_task(&task.id).await.unwrap().total_completions, 1);
    assert!(f.ledger.list().await.unwrap().is_empty());

    let stats = f.market.get_stats().await.unwrap();
    assert!(close(stats.total_payouts, 0.05));
    assert_eq!(stats.total_completed_tasks, 1);
    assert_eq!(stats.total_applications, 1);

    let err = f
        .market
        .submit_application(&task.id, &wallet(2), "https://x.com/status/2")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Capacity(_)));
}

#[tokio::test]
async fn second_review_is_rejected_without_paying() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    let application = apply(&f, &task, 1).await;
    f.market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap();

    for decision in [ReviewDecision::Approve, ReviewDecision::Reject] {
        let err = f.market.review_application(&application.id, decision).await.unwrap_err();
        assert!(matches!(err, MarketError::AlreadyReviewed(_)));
    }
    assert_eq!(f.gateway.payments().len(), 1);
}

#[tokio::test]
async fn concurrent_approvals_pay_once() {
    let f = fixture_with(
        FakeGateway::new().with_delay(Duration::from_millis(50)),
        Duration::from_secs(5),
    );
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    let application = apply(&f, &task, 1).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let market = f.market.clone();
            let id = application.id.clone();
            tokio::spawn(async move { market.review_application(&id, ReviewDecision::Approve).await })
        })
        .collect();
    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(MarketError::AlreadyReviewed(_)) => {}
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(f.gateway.payments().len(), 1);
    assert_eq!(f.market.get_stats().await.unwrap().total_completed_tasks, 1);
}

#[tokio::test]
async fn capacity_is_checked_again_at_approval() {
    let f = fixture_with(
        FakeGateway::new().with_delay(Duration::from_millis(20)),
        Duration::from_secs(5),
    );
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, Some(1))).await.unwrap();
    let first = apply(&f, &task, 1).await;
    let second = apply(&f, &task, 2).await;

    let (a, b) = tokio::join!(
        f.market.review_application(&first.id, ReviewDecision::Approve),
        f.market.review_application(&second.id, ReviewDecision::Approve),
    );
    assert!(a.is_ok() ^ b.is_ok());
    let err = a.err().or_else(|| b.err()).unwrap();
    assert!(matches!(err, MarketError::Capacity(_)));

    assert_eq!(f.gateway.payments().len(), 1);
    let task = f.market.get_task(&task.id).await.unwrap();
    assert_eq!(task.total_completions, 1);
    let pending = f
        .market
        .admin_list_applications(ADMIN, Some(ApplicationStatus::Pending), None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn failed_payment_leaves_application_pending() {
    let f = fixture();
    f.gateway.set_outcome(Outcome::Fail);
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    let application = apply(&f, &task, 1).await;

    let err = f
        .market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Payment(_)));
    assert_eq!(err.public_message(), "payment failed: insufficient funds");

    let stored = f.market.repo.get_application(&application.id).await.unwrap().unwrap();
    assert_eq!(stored, application);
    let stats = f.market.get_stats().await.unwrap();
    assert!(close(stats.total_payouts, 0.0));
    assert_eq!(stats.total_completed_tasks, 0);
    assert_eq!(f.market.get_task(&task.id).await.unwrap().total_completions, 0);
    assert!(f.ledger.list().await.unwrap().is_empty());

    f.gateway.set_outcome(Outcome::Succeed);
    let approved = f
        .market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap();
    assert_eq!(approved.status, ApplicationStatus::Approved);
}

#[tokio::test]
async fn unknown_payment_blocks_review_until_reconciled() {
    let f = fixture();
    f.gateway.set_outcome(Outcome::Unknown);
    let task = f.market.admin_create_task(ADMIN, new_task(0.25, None)).await.unwrap();
    let application = apply(&f, &task, 1).await;

    let err = f
        .market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::PaymentUnknown(_)));
    let intent = f.ledger.get(&application.id).await.unwrap().unwrap();
    assert_eq!(intent.state, PayoutState::Unknown);
    assert_eq!(intent.tx_signature, "sig1");

    let err = f
        .market
        .review_application(&application.id, ReviewDecision::Reject)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    // still in flight, left alone
    let report = f.market.reconcile_payouts().await.unwrap();
    assert_eq!(report.unresolved, vec![application.id.clone()]);

    f.gateway.set_status("sig1", SignatureStatus::Confirmed);
    let report = f.market.reconcile_payouts().await.unwrap();
    assert_eq!(report.finalized, vec![application.id.clone()]);

    let stored = f.market.repo.get_application(&application.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApplicationStatus::Approved);
    assert_eq!(stored.tx_signature.as_deref(), Some("sig1"));
    let stats = f.market.get_stats().await.unwrap();
    assert!(close(stats.total_payouts, 0.25));
    assert_eq!(stats.total_completed_tasks, 1);
    assert!(f.ledger.list().await.unwrap().is_empty());
    assert_eq!(f.gateway.payments().len(), 1);
}

#[tokio::test]
async fn reconcile_drops_failed_and_finishes_sent_payouts() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.1, None)).await.unwrap();
    let sent = apply(&f, &task, 1).await;
    let failed = apply(&f, &task, 2).await;
    let stuck = apply(&f, &task, 3).await;

    // a crash after the treasury confirmed
    f.ledger.record_intent(&sent.id, &task.id, &sent.wallet_address, 0.1).await.unwrap();
    f.ledger.mark_sent(&sent.id, "sigA").await.unwrap();
    f.ledger.record_intent(&failed.id, &task.id, &failed.wallet_address, 0.1).await.unwrap();
    f.ledger.mark_unknown(&failed.id, Some("sigB".into()), "timeout").await.unwrap();
    f.gateway.set_status("sigB", SignatureStatus::Failed);
    // a crash while the payment was in flight
    f.ledger.record_intent(&stuck.id, &task.id, &stuck.wallet_address, 0.1).await.unwrap();

    let report = f.market.reconcile_payouts().await.unwrap();
    assert_eq!(report.finalized, vec![sent.id.clone()]);
    assert_eq!(report.dropped, vec![failed.id.clone()]);
    assert_eq!(report.unresolved, vec![stuck.id.clone()]);

    let stats = f.market.get_stats().await.unwrap();
    assert_eq!(stats.total_completed_tasks, 1);
    assert_eq!(f.market.get_task(&task.id).await.unwrap().total_completions, 1);
    let failed = f.market.repo.get_application(&failed.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ApplicationStatus::Pending);
}

#[tokio::test]
async fn timed_out_payment_resolved_by_operator() {
    let f = fixture_with(
        FakeGateway::new().with_submit_delay(Duration::from_millis(500)),
        Duration::from_millis(20),
    );
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    let first = apply(&f, &task, 1).await;
    let second = apply(&f, &task, 2).await;

    for application in [&first, &second] {
        let err = f
            .market
            .review_application(&application.id, ReviewDecision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::PaymentUnknown(_)));
        let intent = f.ledger.get(&application.id).await.unwrap().unwrap();
        assert_eq!(intent.state, PayoutState::Unknown);
        assert!(intent.tx_signature.is_empty());
    }
    assert!(f.market.admin_list_payout_intents("wrong").await.is_err());
    assert_eq!(f.market.admin_list_payout_intents(ADMIN).await.unwrap().len(), 2);

    // operator found nothing on chain for the first one
    let reopened = f.market.admin_resolve_payout(ADMIN, &first.id, None).await.unwrap();
    assert_eq!(reopened.status, ApplicationStatus::Pending);
    assert!(f.ledger.get(&first.id).await.unwrap().is_none());

    // and a confirmed transfer for the second
    let err = f
        .market
        .admin_resolve_payout(ADMIN, &second.id, Some("sigX".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    f.gateway.set_status("sigX", SignatureStatus::Confirmed);
    let approved = f
        .market
        .admin_resolve_payout(ADMIN, &second.id, Some("sigX".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, ApplicationStatus::Approved);
    assert_eq!(approved.tx_signature.as_deref(), Some("sigX"));
    assert!(f.ledger.list().await.unwrap().is_empty());

    let err = f.market.admin_resolve_payout(ADMIN, &second.id, None).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn send_payment_submits_then_confirms() {
    let gateway = FakeGateway::new();
    let receipt = gateway.send_payment(&wallet(1), 0.2).await.unwrap();
    assert_eq!(receipt.signature, "sig1");
    gateway.set_outcome(Outcome::Fail);
    let err = gateway.send_payment(&wallet(2), 0.2).await.unwrap_err();
    assert_eq!(err, PaymentError::Failed("insufficient funds".into()));
    assert_eq!(gateway.payments().len(), 2);
}

#[tokio::test]
async fn unanswered_payment_keeps_its_signature() {
    // the gateway gives up at the same moment the market does
    let f = fixture_with(
        FakeGateway::new()
            .with_submit_delay(Duration::from_millis(20))
            .with_delay(Duration::from_millis(100)),
        Duration::from_millis(100),
    );
    f.gateway.set_outcome(Outcome::Unknown);
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, Some(1))).await.unwrap();
    let application = apply(&f, &task, 1).await;

    let err = f
        .market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::PaymentUnknown(_)));
    let intent = f.ledger.get(&application.id).await.unwrap().unwrap();
    assert_eq!(intent.state, PayoutState::Unknown);
    assert_eq!(intent.tx_signature, "sig1");

    f.gateway.set_status("sig1", SignatureStatus::Confirmed);
    let report = f.market.reconcile_payouts().await.unwrap();
    assert_eq!(report.finalized, vec![application.id.clone()]);
    let stored = f.market.repo.get_application(&application.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApplicationStatus::Approved);
    assert_eq!(stored.tx_signature.as_deref(), Some("sig1"));
    assert_eq!(f.market.get_stats().await.unwrap().total_completed_tasks, 1);
    assert_eq!(f.gateway.payments().len(), 1);
}

#[tokio::test]
async fn submitted_payment_survives_a_crash() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.1, None)).await.unwrap();
    let landed = apply(&f, &task, 1).await;
    let lost = apply(&f, &task, 2).await;

    // the process died while waiting for confirmation
    for (application, signature) in [(&landed, "sigA"), (&lost, "sigB")] {
        f.ledger
            .record_intent(&application.id, &task.id, &application.wallet_address, 0.1)
            .await
            .unwrap();
        f.ledger.attach_signature(&application.id, signature).await.unwrap();
    }
    f.gateway.set_status("sigA", SignatureStatus::Confirmed);
    f.gateway.set_status("sigB", SignatureStatus::Failed);

    let report = f.market.reconcile_payouts().await.unwrap();
    assert_eq!(report.finalized, vec![landed.id.clone()]);
    assert_eq!(report.dropped, vec![lost.id.clone()]);
    let lost = f.market.repo.get_application(&lost.id).await.unwrap().unwrap();
    assert_eq!(lost.status, ApplicationStatus::Pending);
    assert_eq!(f.market.get_stats().await.unwrap().total_completed_tasks, 1);
}

#[tokio::test]
async fn failed_approval_write_is_not_counted_twice() {
    let store = Arc::new(FlakyStore::new());
    let f = fixture_on(store.clone(), FakeGateway::new(), Duration::from_secs(5));
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, Some(1))).await.unwrap();
    let application = apply(&f, &task, 1).await;

    store.reject_approvals(true);
    let err = f
        .market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Internal(_)));
    let intent = f.ledger.get(&application.id).await.unwrap().unwrap();
    assert_eq!(intent.state, PayoutState::Counted);
    assert_eq!(intent.tx_signature, "sig1");
    let err = f.market.admin_resolve_payout(ADMIN, &application.id, None).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    store.reject_approvals(false);
    let report = f.market.reconcile_payouts().await.unwrap();
    assert_eq!(report.finalized, vec![application.id.clone()]);

    let stats = f.market.get_stats().await.unwrap();
    assert_eq!(stats.total_completed_tasks, 1);
    assert!(close(stats.total_payouts, 0.05));
    let task = f.market.get_task(&task.id).await.unwrap();
    assert_eq!(task.total_completions, 1);
    let stored = f.market.repo.get_application(&application.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ApplicationStatus::Approved);
    assert_eq!(stored.tx_signature.as_deref(), Some("sig1"));
    assert!(f.ledger.list().await.unwrap().is_empty());
    assert_eq!(f.gateway.payments().len(), 1);
}

#[tokio::test]
async fn payout_totals_match_approved_rewards() {
    let f = fixture();
    let rewards = [0.05, 0.1, 0.3];
    let mut expected = 0.0;
    for (i, reward) in rewards.iter().enumerate() {
        let task = f.market.admin_create_task(ADMIN, new_task(*reward, None)).await.unwrap();
        let approve = apply(&f, &task, i as u8 + 1).await;
        let reject = apply(&f, &task, i as u8 + 10).await;
        f.market
            .review_application(&approve.id, ReviewDecision::Approve)
            .await
            .unwrap();
        f.market
            .review_application(&reject.id, ReviewDecision::Reject)
            .await
            .unwrap();
        expected += reward;
    }
    let stats = f.market.get_stats().await.unwrap();
    assert!(close(stats.total_payouts, expected));
    assert_eq!(stats.total_completed_tasks, 3);
    assert_eq!(stats.total_applications, 6);
    assert_eq!(stats.total_tasks, 3);
    let paid: f64 = f.gateway.payments().iter().map(|(_, amount)| amount).sum();
    assert!(close(paid, expected));
}

#[tokio::test]
async fn created_task_reads_back_unchanged() {
    let f = fixture();
    let input = new_task(0.5, Some(10));
    let task = f.market.admin_create_task(ADMIN, input.clone()).await.unwrap();
    let read = f.market.get_task(&task.id).await.unwrap();
    assert_eq!(read, task);
    assert_eq!(read.title, input.title);
    assert_eq!(read.description, input.description);
    assert_eq!(read.instructions, input.instructions);
    assert_eq!(read.proof_type, input.proof_type);
    assert_eq!(read.reward, input.reward);
    assert_eq!(read.difficulty, input.difficulty);
    assert_eq!(read.category, input.category);
    assert_eq!(read.max_completions, input.max_completions);
    assert_eq!(read.total_completions, 0);
    assert_eq!(read.created_by, None);
}

#[tokio::test]
async fn deleted_task_blocks_approval_but_not_rejection() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    let first = apply(&f, &task, 1).await;
    let second = apply(&f, &task, 2).await;
    assert!(f.market.admin_delete_task(ADMIN, &task.id).await.unwrap());
    assert!(matches!(
        f.market.admin_delete_task(ADMIN, &task.id).await.unwrap_err(),
        MarketError::NotFound(_)
    ));

    let err = f
        .market
        .review_application(&first.id, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
    assert!(f.gateway.payments().is_empty());
    let rejected = f
        .market
        .review_application(&second.id, ReviewDecision::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.status, ApplicationStatus::Rejected);
    assert!(rejected.tx_signature.is_none());
}

#[tokio::test]
async fn registration_checks_payment_and_wallet() {
    let f = fixture();

    let err = f.market.register_agent("bot", "not-base58!", "txsig").await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    assert_eq!(*f.gateway.verify_calls.lock().unwrap(), 0);

    *f.gateway.verification.lock().unwrap() =
        TransferVerification::rejected(0.05, "amount 0.05 SOL is below the required 0.1 SOL");
    let err = f.market.register_agent("bot", &wallet(1), "txsig").await.unwrap_err();
    assert!(matches!(err, MarketError::Verification(_)));
    assert!(err.public_message().contains("below"));
    assert!(f.market.admin_list_agents(ADMIN).await.unwrap().is_empty());
    assert_eq!(f.market.get_stats().await.unwrap().total_agents, 0);

    *f.gateway.verification.lock().unwrap() = TransferVerification::accepted(0.1);
    let agent = f.market.register_agent(" bot ", &wallet(1), "txsig").await.unwrap();
    assert_eq!(agent.name, "bot");
    assert!(agent.api_key.starts_with(API_KEY_PREFIX));
    assert_eq!(agent.api_key.len(), API_KEY_PREFIX.len() + 40);
    assert!(agent.active);
    assert_eq!(agent.payment_amount, 0.1);

    let err = f.market.register_agent("bot2", &wallet(1), "othersig").await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));
    assert_eq!(f.market.get_stats().await.unwrap().total_agents, 1);

    let listed = f.market.admin_list_agents(ADMIN).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_ne!(listed[0].api_key, agent.api_key);
    assert!(listed[0].api_key.starts_with("****"));
}

#[tokio::test]
async fn agents_manage_their_own_tasks() {
    let f = fixture();
    let agent = f.market.register_agent("bot", &wallet(1), "tx1").await.unwrap();
    let other = f.market.register_agent("other", &wallet(2), "tx2").await.unwrap();

    let task = f
        .market
        .agent_create_task(&agent.api_key, new_task(0.2, None))
        .await
        .unwrap();
    assert_eq!(task.created_by.as_deref(), Some(agent.id.as_str()));
    f.market
        .agent_create_task(&other.api_key, new_task(0.2, None))
        .await
        .unwrap();

    let profile = f.market.agent_profile(&agent.api_key).await.unwrap();
    assert_eq!(profile.tasks_created, 1);
    assert!(profile.api_key.starts_with("****"));

    let mine = f.market.agent_list_tasks(&agent.api_key).await.unwrap();
    assert_eq!(mine, vec![task.clone()]);
    assert_eq!(f.market.agent_get_task(&agent.api_key, &task.id).await.unwrap(), task);
    assert!(matches!(
        f.market.agent_get_task(&other.api_key, &task.id).await.unwrap_err(),
        MarketError::NotFound(_)
    ));

    let application = f
        .market
        .agent_apply(&other.api_key, &task.id, &wallet(3), "done")
        .await
        .unwrap();
    assert_eq!(application.task_id, task.id);

    let err = f
        .market
        .agent_create_task(&agent.api_key, new_task(0.0, None))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    f.market.admin_set_agent_active(ADMIN, &agent.id, false).await.unwrap();
    let err = f.market.agent_list_tasks(&agent.api_key).await.unwrap_err();
    assert!(matches!(err, MarketError::Unauthorized(_)));
    let err = f.market.agent_profile("tm_nope").await.unwrap_err();
    assert!(matches!(err, MarketError::Unauthorized(_)));
    let err = f.market.agent_profile("").await.unwrap_err();
    assert!(matches!(err, MarketError::Unauthorized(_)));
}

#[tokio::test]
async fn admin_calls_need_the_password() {
    let f = fixture();
    let err = f.market.admin_create_task("nope", new_task(0.1, None)).await.unwrap_err();
    assert!(matches!(err, MarketError::Unauthorized(_)));
    assert!(f.market.admin_list_tasks("").await.is_err());
    assert_eq!(f.market.get_stats().await.unwrap().total_tasks, 0);
}

#[tokio::test]
async fn task_updates_respect_invariants() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, Some(2))).await.unwrap();
    let application = apply(&f, &task, 1).await;
    f.market
        .review_application(&application.id, ReviewDecision::Approve)
        .await
        .unwrap();

    let err = f
        .market
        .admin_update_task(ADMIN, &task.id, TaskPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let shrink = TaskPatch {
        max_completions: Some(0),
        ..Default::default()
    };
    let err = f.market.admin_update_task(ADMIN, &task.id, shrink).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let deactivate = TaskPatch {
        active: Some(false),
        title: Some("Renamed".into()),
        ..Default::default()
    };
    let updated = f.market.admin_update_task(ADMIN, &task.id, deactivate).await.unwrap();
    assert_eq!(updated.id, task.id);
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.reward, task.reward);
    assert_eq!(updated.total_completions, 1);
    assert!(f.market.list_active_tasks().await.unwrap().is_empty());
    assert_eq!(f.market.admin_list_tasks(ADMIN).await.unwrap().len(), 1);

    let err = f
        .market
        .submit_application(&task.id, &wallet(2), "proof")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let missing = TaskPatch {
        active: Some(true),
        ..Default::default()
    };
    let err = f.market.admin_update_task(ADMIN, "missing", missing).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn submission_validates_input() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    let err = f.market.submit_application(&task.id, "bad", "proof").await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let err = f.market.submit_application(&task.id, &wallet(1), "   ").await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let err = f.market.submit_application("missing", &wallet(1), "proof").await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));

    // the same wallet may apply twice
    apply(&f, &task, 1).await;
    apply(&f, &task, 1).await;
    let listed = f
        .market
        .admin_list_applications(ADMIN, None, Some(&task.id))
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn proof_images_round_trip() {
    let f = fixture();
    let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
    let image = f
        .market
        .upload_proof_image(Base64Byte::new(png.clone()), "image/png")
        .await
        .unwrap();
    assert_eq!(image.content_type, "image/png");
    assert_eq!(image.size, png.len());
    assert_eq!(f.market.get_proof_image(&image.id).await.unwrap().0, png);

    let err = f
        .market
        .upload_proof_image(Base64Byte::new(b"<svg/>".to_vec()), "image/svg+xml")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let too_big = vec![0xffu8; DEFAULT_MAX_UPLOAD_SIZE + 1];
    let err = f
        .market
        .upload_proof_image(Base64Byte::new(too_big), "image/jpeg")
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let err = f.market.get_proof_image("../secret").await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));
    let unknown = crate::resource::image_id(b"other", "png");
    let err = f.market.get_proof_image(&unknown).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));
}

#[tokio::test]
async fn treasury_history_is_bounded() {
    let f = fixture();
    let task = f.market.admin_create_task(ADMIN, new_task(0.05, None)).await.unwrap();
    for n in 1..=3 {
        let application = apply(&f, &task, n).await;
        f.market
            .review_application(&application.id, ReviewDecision::Approve)
            .await
            .unwrap();
    }
    assert_eq!(f.market.list_treasury_payouts(None).await.unwrap().len(), 3);
    let latest = f.market.list_treasury_payouts(Some(1)).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].to, wallet(3));
    assert_eq!(f.market.list_treasury_payouts(Some(0)).await.unwrap().len(), 1);
}
