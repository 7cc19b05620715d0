use super::tx::{load_keypair, TransferMessage};
use super::{
    lamports_to_sol, parse_address, sol_to_lamports, PaymentError, PaymentGateway, PaymentReceipt, SignatureStatus,
    SubmittedPayment, TransferVerification,
};
use crate::config::ChainConfig;
use crate::models::{TransferStatus, TreasuryPayout};
use crate::utils::IntoAnyhow;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const SYSTEM_PROGRAM: &str = "11111111111111111111111111111111";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_HISTORY: usize = 100;

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSignatureStatus {
    err: Option<Value>,
    confirmation_status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureInfo {
    signature: String,
    err: Option<Value>,
    block_time: Option<i64>,
}

/// `getTransaction` result with `jsonParsed` encoding, only the parts used here
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParsedTransaction {
    block_time: Option<i64>,
    meta: Option<TransactionMeta>,
    transaction: TransactionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMeta {
    err: Option<Value>,
    #[serde(default)]
    inner_instructions: Option<Vec<InnerInstructions>>,
}

#[derive(Debug, Deserialize)]
struct InnerInstructions {
    instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Deserialize)]
struct TransactionBody {
    message: TransactionMessage,
}

#[derive(Debug, Deserialize)]
struct TransactionMessage {
    instructions: Vec<ParsedInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedInstruction {
    program_id: Option<String>,
    parsed: Option<Value>,
}

/// A System Program transfer found in a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
struct SystemTransfer {
    source: String,
    destination: String,
    lamports: u64,
}

impl ParsedTransaction {
    fn failed(&self) -> bool {
        self.meta.as_ref().map(|m| m.err.is_some()).unwrap_or(false)
    }

    fn system_transfers(&self) -> Vec<SystemTransfer> {
        let inner = self
            .meta
            .iter()
            .flat_map(|m| m.inner_instructions.iter().flatten())
            .flat_map(|i| i.instructions.iter());
        self.transaction
            .message
            .instructions
            .iter()
            .chain(inner)
            .filter_map(|ix| {
                if ix.program_id.as_deref() != Some(SYSTEM_PROGRAM) {
                    return None;
                }
                let parsed = ix.parsed.as_ref()?;
                if parsed.get("type")?.as_str()? != "transfer" {
                    return None;
                }
                let info = parsed.get("info")?;
                Some(SystemTransfer {
                    source: info.get("source")?.as_str()?.to_string(),
                    destination: info.get("destination")?.as_str()?.to_string(),
                    lamports: info.get("lamports")?.as_u64()?,
                })
            })
            .collect()
    }
}

/// Check a fetched transaction against an expected payment
pub(crate) fn check_transfer(
    tx: Option<&ParsedTransaction>,
    from: &str,
    to: &str,
    min_amount: f64,
) -> TransferVerification {
    let tx = match tx {
        Some(tx) => tx,
        None => return TransferVerification::rejected(0.0, "transaction not found"),
    };
    if tx.failed() {
        return TransferVerification::rejected(0.0, "transaction failed on-chain");
    }
    let lamports: u64 = tx
        .system_transfers()
        .iter()
        .filter(|t| t.source == from && t.destination == to)
        .map(|t| t.lamports)
        .sum();
    if lamports == 0 {
        return TransferVerification::rejected(0.0, format!("no transfer from {} to {} found", from, to));
    }
    let amount = lamports_to_sol(lamports);
    if lamports < sol_to_lamports(min_amount) {
        return TransferVerification::rejected(
            amount,
            format!("amount {} SOL is below the required {} SOL", amount, min_amount),
        );
    }
    TransferVerification::accepted(amount)
}

/// Payment gateway backed by a Solana json-rpc node, the treasury key signs every payout
pub struct SolanaGateway {
    client: HttpClient,
    treasury: SigningKey,
    treasury_address: String,
    payment_timeout: Duration,
    poll_interval: Duration,
}

impl SolanaGateway {
    pub fn new(cfg: &ChainConfig) -> Result<Self> {
        let treasury = load_keypair(&cfg.treasury_key)?;
        let treasury_address = bs58::encode(treasury.verifying_key().to_bytes()).into_string();
        let client = HttpClientBuilder::default()
            .request_timeout(REQUEST_TIMEOUT)
            .build(cfg.rpc_url.as_str())
            .anyhow()?;
        info!("payment gateway {} treasury {}", cfg.rpc_url, treasury_address);
        Ok(SolanaGateway {
            client,
            treasury,
            treasury_address,
            payment_timeout: cfg.payment_timeout,
            poll_interval: POLL_INTERVAL,
        })
    }

    pub fn treasury_address(&self) -> &str {
        &self.treasury_address
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Option<jsonrpsee::types::ParamsSer<'_>>) -> Result<R> {
        self.client
            .request(method, params)
            .await
            .map_err(|e| anyhow!("{} failed: {}", method, e))
    }

    async fn latest_blockhash(&self) -> Result<LatestBlockhash> {
        let resp: WithContext<LatestBlockhash> = self
            .call("getLatestBlockhash", rpc_params![json!({"commitment": "confirmed"})])
            .await?;
        Ok(resp.value)
    }

    async fn block_height(&self) -> Result<u64> {
        self.call("getBlockHeight", rpc_params![json!({"commitment": "confirmed"})])
            .await
    }

    async fn fetch_status(&self, signature: &str) -> Result<Option<RpcSignatureStatus>> {
        let resp: WithContext<Vec<Option<RpcSignatureStatus>>> = self
            .call(
                "getSignatureStatuses",
                rpc_params![vec![signature], json!({"searchTransactionHistory": true})],
            )
            .await?;
        Ok(resp.value.into_iter().next().flatten())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>> {
        self.call(
            "getTransaction",
            rpc_params![
                signature,
                json!({"encoding": "jsonParsed", "commitment": "confirmed", "maxSupportedTransactionVersion": 0})
            ],
        )
        .await
    }

    async fn await_confirmation(&self, signature: &str, last_valid_height: u64) -> Result<PaymentReceipt, PaymentError> {
        let started = Instant::now();
        loop {
            let status = match self.fetch_status(signature).await {
                Ok(status) => status,
                Err(e) => {
                    debug!("poll status of {}: {}", signature, e);
                    None
                }
            };
            let height = match status {
                Some(_) => None,
                None => match self.block_height().await {
                    Ok(height) => Some(height),
                    Err(e) => {
                        debug!("poll block height: {}", e);
                        None
                    }
                },
            };

            if let Some(outcome) = poll_outcome(
                signature,
                status.as_ref(),
                height,
                last_valid_height,
                started.elapsed(),
                self.payment_timeout,
            ) {
                return outcome;
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn is_confirmed(status: Option<&str>) -> bool {
    matches!(status, Some("confirmed") | Some("finalized"))
}

/// Decide a payment from one poll, `None` keeps polling. `block_height` is only looked at while
/// the node does not know the signature.
fn poll_outcome(
    signature: &str,
    status: Option<&RpcSignatureStatus>,
    block_height: Option<u64>,
    last_valid_height: u64,
    waited: Duration,
    timeout: Duration,
) -> Option<Result<PaymentReceipt, PaymentError>> {
    match status {
        Some(status) if status.err.is_some() => {
            return Some(Err(PaymentError::Failed(format!(
                "transaction {} failed on-chain",
                signature
            ))));
        }
        Some(status) if is_confirmed(status.confirmation_status.as_deref()) => {
            return Some(Ok(PaymentReceipt {
                signature: signature.to_string(),
            }));
        }
        Some(_) => {}
        None => {
            if matches!(block_height, Some(height) if height > last_valid_height) {
                return Some(Err(PaymentError::Failed(format!(
                    "transaction {} expired before landing",
                    signature
                ))));
            }
        }
    }
    if waited >= timeout {
        return Some(Err(PaymentError::Unknown {
            signature: Some(signature.to_string()),
            reason: format!("not confirmed within {:?}", timeout),
        }));
    }
    None
}

#[async_trait]
impl PaymentGateway for SolanaGateway {
    async fn submit_payment(&self, to: &str, amount: f64) -> Result<SubmittedPayment, PaymentError> {
        let destination = parse_address(to).map_err(|e| PaymentError::Failed(e.to_string()))?;
        let lamports = sol_to_lamports(amount);
        if lamports == 0 {
            return Err(PaymentError::Failed(format!("amount {} SOL is too small", amount)));
        }

        let blockhash = self
            .latest_blockhash()
            .await
            .map_err(|e| PaymentError::Failed(e.to_string()))?;
        let recent_blockhash = parse_address(&blockhash.blockhash).map_err(|e| PaymentError::Failed(e.to_string()))?;
        let tx = TransferMessage {
            from: self.treasury.verifying_key().to_bytes(),
            to: destination,
            lamports,
            recent_blockhash,
        }
        .sign(&self.treasury)
        .map_err(|e| PaymentError::Failed(e.to_string()))?;
        let signature = tx.signature_string();

        info!("sending {} lamports to {} in transaction {}", lamports, to, signature);
        let submitted: Result<String, jsonrpsee::core::Error> = self
            .client
            .request(
                "sendTransaction",
                rpc_params![
                    tx.to_base64(),
                    json!({"encoding": "base64", "preflightCommitment": "confirmed"})
                ],
            )
            .await;
        match submitted {
            Ok(_) => {}
            // the node answered with an error, the transaction was not forwarded
            Err(jsonrpsee::core::Error::Request(reason)) => {
                return Err(PaymentError::Failed(format!("transaction rejected: {}", reason)));
            }
            Err(e) => warn!("submit transaction {}: {}, polling for its status", signature, e),
        }

        Ok(SubmittedPayment {
            signature,
            last_valid_height: blockhash.last_valid_block_height,
        })
    }

    async fn await_payment(&self, payment: &SubmittedPayment) -> Result<PaymentReceipt, PaymentError> {
        self.await_confirmation(&payment.signature, payment.last_valid_height)
            .await
    }

    async fn verify_transfer(&self, signature: &str, from: &str, to: &str, min_amount: f64) -> Result<TransferVerification> {
        let tx = self.get_transaction(signature).await?;
        Ok(check_transfer(tx.as_ref(), from, to, min_amount))
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus> {
        Ok(match self.fetch_status(signature).await? {
            None => SignatureStatus::NotFound,
            Some(status) if status.err.is_some() => SignatureStatus::Failed,
            Some(status) if is_confirmed(status.confirmation_status.as_deref()) => SignatureStatus::Confirmed,
            Some(_) => SignatureStatus::Pending,
        })
    }

    async fn treasury_history(&self, limit: usize) -> Result<Vec<TreasuryPayout>> {
        let infos: Vec<SignatureInfo> = self
            .call(
                "getSignaturesForAddress",
                rpc_params![
                    self.treasury_address.as_str(),
                    json!({"limit": limit.clamp(1, MAX_HISTORY), "commitment": "confirmed"})
                ],
            )
            .await?;

        let txs = futures::future::join_all(infos.iter().map(|info| self.get_transaction(&info.signature))).await;
        let mut payouts = vec![];
        for (info, tx) in infos.iter().zip(txs) {
            let tx = match tx {
                Ok(Some(tx)) => tx,
                Ok(None) => continue,
                Err(e) => {
                    warn!("fetch treasury transaction {}: {}", info.signature, e);
                    continue;
                }
            };
            payouts.extend(outgoing_payouts(info, &tx, &self.treasury_address));
        }
        Ok(payouts)
    }
}

fn outgoing_payouts(info: &SignatureInfo, tx: &ParsedTransaction, treasury: &str) -> Vec<TreasuryPayout> {
    let status = if info.err.is_some() || tx.failed() {
        TransferStatus::Failed
    } else {
        TransferStatus::Success
    };
    tx.system_transfers()
        .into_iter()
        .filter(|t| t.source == treasury)
        .map(|t| TreasuryPayout {
            signature: info.signature.clone(),
            to: t.destination,
            amount: lamports_to_sol(t.lamports),
            timestamp: info.block_time.or(tx.block_time),
            status,
        })
        .collect()
}
