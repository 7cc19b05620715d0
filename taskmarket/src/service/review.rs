//! Application review and the payout flow behind approvals.
//!
//! Approval order: intent recorded, transfer submitted and its signature kept, treasury
//! confirms, counters bumped and the intent marked counted, application saved, intent removed.
//! Whatever point a crash or an unanswered payment stops at, the intent says what is left to do.

use super::{review_lock, task_lock, Market, MarketError, MarketResult};
use crate::chain::{PaymentError, SignatureStatus};
use crate::models::{Application, ApplicationStatus, ReviewDecision, Task};
use crate::payout::PayoutIntent;
use anyhow::{bail, Result};
use chrono::Utc;
use entity::PayoutState;
use log::{error, info, warn};
use tokio::time::timeout;

/// Outcome of a reconciliation pass over the payout ledger
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub finalized: Vec<String>,
    pub dropped: Vec<String>,
    pub unresolved: Vec<String>,
}

impl Market {
    pub async fn review_application(&self, id: &str, decision: ReviewDecision) -> MarketResult<Application> {
        let _guard = self.locks.lock(&review_lock(id)).await;
        let mut application = self
            .repo
            .get_application(id)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("application {}", id)))?;
        if application.status != ApplicationStatus::Pending {
            return Err(MarketError::AlreadyReviewed(id.to_string()));
        }
        if let Some(intent) = self.ledger.get(id).await? {
            return Err(MarketError::Conflict(format!(
                "payout for application {} is {}, resolve it before reviewing again",
                id, intent.state
            )));
        }

        match decision {
            ReviewDecision::Reject => {
                application.status = ApplicationStatus::Rejected;
                application.reviewed_at = Some(Utc::now());
                self.repo.save_reviewed_application(&application).await?;
                info!("application {} rejected", id);
                Ok(application)
            }
            ReviewDecision::Approve => self.approve(application).await,
        }
    }

    /// Caller holds the review lock of the application
    async fn approve(&self, application: Application) -> MarketResult<Application> {
        let _task_guard = self.locks.lock(&task_lock(&application.task_id)).await;
        let task: Task = self
            .repo
            .get_task(&application.task_id)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("task {}", application.task_id)))?;
        if !task.has_capacity() {
            return Err(MarketError::Capacity(task.id));
        }

        let id = application.id.clone();
        let intent = self
            .ledger
            .record_intent(&id, &task.id, &application.wallet_address, task.reward)
            .await?;
        info!(
            "paying {} SOL to {} for application {}",
            task.reward, application.wallet_address, id
        );

        let submitted = match timeout(
            self.config.payment_timeout,
            self.gateway.submit_payment(&application.wallet_address, task.reward),
        )
        .await
        {
            Ok(Ok(submitted)) => submitted,
            Ok(Err(e)) => return Err(self.payment_error(&id, e).await?),
            Err(_) => {
                let reason = format!("transfer not submitted within {:?}", self.config.payment_timeout);
                return Err(self
                    .payment_error(&id, PaymentError::Unknown { signature: None, reason })
                    .await?);
            }
        };
        self.ledger.attach_signature(&id, &submitted.signature).await?;

        let confirmed = timeout(self.config.payment_timeout, self.gateway.await_payment(&submitted))
            .await
            .unwrap_or_else(|_| {
                Err(PaymentError::Unknown {
                    signature: Some(submitted.signature.clone()),
                    reason: format!("no answer within {:?}", self.config.payment_timeout),
                })
            });
        match confirmed {
            Ok(receipt) => {
                self.ledger.mark_sent(&id, &receipt.signature).await?;
                info!("payout for application {} confirmed in {}", id, receipt.signature);
                Ok(self.finalize(application, &intent, &receipt.signature).await?)
            }
            Err(e) => Err(self.payment_error(&id, e).await?),
        }
    }

    /// Record a payout that did not confirm and turn it into the error returned to the reviewer
    async fn payment_error(&self, id: &str, error: PaymentError) -> Result<MarketError> {
        match error {
            PaymentError::Failed(reason) => {
                self.ledger.delete(id).await?;
                warn!("payout for application {} failed: {}", id, reason);
                Ok(MarketError::Payment(reason))
            }
            PaymentError::Unknown { signature, reason } => {
                error!(
                    "payout for application {} is unknown ({}), signature {:?}",
                    id, reason, signature
                );
                self.ledger.mark_unknown(id, signature, &reason).await?;
                Ok(MarketError::PaymentUnknown(format!(
                    "application {}: {}, payout needs reconciliation",
                    id, reason
                )))
            }
        }
    }

    /// Persist everything a confirmed payout implies and clear its intent. Counters are applied
    /// at most once per intent, a retry after a failed application write skips them.
    async fn finalize(&self, mut application: Application, intent: &PayoutIntent, signature: &str) -> Result<Application> {
        if intent.state != PayoutState::Counted {
            if self
                .repo
                .increment_task_completions(&application.task_id)
                .await?
                .is_none()
            {
                warn!(
                    "task {} vanished while paying application {}",
                    application.task_id, application.id
                );
            }
            self.repo.record_payout(intent.amount).await?;
            self.ledger.mark_counted(&application.id).await?;
        }

        let now = Utc::now();
        application.status = ApplicationStatus::Approved;
        application.tx_signature = Some(signature.to_string());
        application.paid_at = Some(now);
        application.reviewed_at = Some(now);
        self.repo.save_reviewed_application(&application).await?;
        self.ledger.delete(&application.id).await?;
        info!("application {} approved", application.id);
        Ok(application)
    }

    /// Finalize a payout known to have landed with `signature`
    async fn settle(&self, intent: &PayoutIntent, signature: &str) -> Result<Application> {
        let _task_guard = self.locks.lock(&task_lock(&intent.task_id)).await;
        let application = match self.repo.get_application(&intent.application_id).await? {
            Some(application) => application,
            None => bail!("application {} of payout intent not found", intent.application_id),
        };
        match application.status {
            ApplicationStatus::Pending => self.finalize(application, intent, signature).await,
            ApplicationStatus::Approved => {
                self.ledger.delete(&application.id).await?;
                Ok(application)
            }
            ApplicationStatus::Rejected => bail!(
                "application {} was rejected but has a payout in {}",
                application.id,
                signature
            ),
        }
    }

    /// Walk the payout ledger and finish what can be decided without an operator
    pub async fn reconcile_payouts(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for intent in self.ledger.list().await? {
            let id = intent.application_id.clone();
            let _guard = self.locks.lock(&review_lock(&id)).await;
            match self.reconcile_one(&intent).await {
                Ok(Some(true)) => report.finalized.push(id),
                Ok(Some(false)) => report.dropped.push(id),
                Ok(None) => {
                    warn!(
                        "payout for application {} is {} (signature {:?}), resolve it manually",
                        id, intent.state, intent.tx_signature
                    );
                    report.unresolved.push(id)
                }
                Err(e) => {
                    error!("reconcile payout for application {}: {:?}", id, e);
                    report.unresolved.push(id)
                }
            }
        }
        info!(
            "payout reconciliation: {} finalized, {} dropped, {} unresolved",
            report.finalized.len(),
            report.dropped.len(),
            report.unresolved.len()
        );
        Ok(report)
    }

    /// `Some(true)` finalized, `Some(false)` dropped, `None` left alone
    async fn reconcile_one(&self, intent: &PayoutIntent) -> Result<Option<bool>> {
        if intent.tx_signature.is_empty() {
            return Ok(None);
        }
        match intent.state {
            PayoutState::Sent | PayoutState::Counted => {
                self.settle(intent, &intent.tx_signature).await?;
                Ok(Some(true))
            }
            // submitted before a crash or left unanswered, the chain decides
            PayoutState::Sending | PayoutState::Unknown => match self
                .gateway
                .signature_status(&intent.tx_signature)
                .await?
            {
                SignatureStatus::Confirmed => {
                    self.settle(intent, &intent.tx_signature).await?;
                    Ok(Some(true))
                }
                SignatureStatus::Failed => {
                    self.ledger.delete(&intent.application_id).await?;
                    info!(
                        "payout {} for application {} failed on chain, intent dropped",
                        intent.tx_signature, intent.application_id
                    );
                    Ok(Some(false))
                }
                SignatureStatus::Pending | SignatureStatus::NotFound => Ok(None),
            },
        }
    }

    /// Operator decision on an outstanding payout. With a signature the payout is taken as
    /// done, without one the intent is dropped and the application can be reviewed again.
    pub async fn resolve_payout(&self, application_id: &str, signature: Option<String>) -> MarketResult<Application> {
        let _guard = self.locks.lock(&review_lock(application_id)).await;
        let intent = self
            .ledger
            .get(application_id)
            .await?
            .ok_or_else(|| MarketError::not_found(format!("payout intent for application {}", application_id)))?;

        match signature.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(signature) => {
                match self.gateway.signature_status(&signature).await? {
                    SignatureStatus::Confirmed => {}
                    status => {
                        return Err(MarketError::invalid(format!(
                            "transaction {} is not confirmed ({:?})",
                            signature, status
                        )))
                    }
                }
                let application = self.settle(&intent, &signature).await?;
                info!("payout for application {} resolved with {}", application_id, signature);
                Ok(application)
            }
            None => {
                if matches!(intent.state, PayoutState::Sent | PayoutState::Counted) {
                    return Err(MarketError::Conflict(format!(
                        "payout for application {} was confirmed in {}, resolve it with that signature",
                        application_id, intent.tx_signature
                    )));
                }
                self.ledger.delete(application_id).await?;
                warn!("payout intent for application {} dropped by operator", application_id);
                self.repo
                    .get_application(application_id)
                    .await?
                    .ok_or_else(|| MarketError::not_found(format!("application {}", application_id)))
            }
        }
    }
}
