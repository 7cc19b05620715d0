//! Access to the payment network.
//!
//! Amounts are SOL everywhere above this module, conversion to lamports happens at the
//! gateway boundary.

use crate::models::TreasuryPayout;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

mod solana;
mod tx;

pub use solana::SolanaGateway;
pub use tx::{load_keypair, SignedTransaction, TransferMessage};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Decode a base58 account address
pub fn parse_address(address: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(address.trim())
        .into_vec()
        .map_err(|e| anyhow!("invalid address {}: {}", address, e))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| anyhow!("invalid address {}: expected 32 bytes, got {}", address, bytes.len()))
}

pub fn is_valid_address(address: &str) -> bool {
    parse_address(address).is_ok()
}

/// Outcome of checking that a transaction paid at least a minimum amount between two addresses
#[derive(Debug, Clone, PartialEq)]
pub struct TransferVerification {
    pub valid: bool,
    /// Transferred amount in SOL, zero when no matching transfer exists
    pub amount: f64,
    pub reason: Option<String>,
}

impl TransferVerification {
    pub fn accepted(amount: f64) -> Self {
        TransferVerification {
            valid: true,
            amount,
            reason: None,
        }
    }

    pub fn rejected(amount: f64, reason: impl Into<String>) -> Self {
        TransferVerification {
            valid: false,
            amount,
            reason: Some(reason.into()),
        }
    }
}

/// A transfer handed to the network whose outcome is not known yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedPayment {
    pub signature: String,
    /// Block height after which the transaction can no longer land
    pub last_valid_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    /// Nothing was transferred
    #[error("payment failed: {0}")]
    Failed(String),
    /// The transfer may or may not have landed
    #[error("payment outcome unknown: {reason}")]
    Unknown {
        signature: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Confirmed,
    Failed,
    Pending,
    NotFound,
}

#[async_trait]
pub trait PaymentGateway {
    /// Sign and submit a transfer of `amount` SOL from the treasury to `to`. The signature is
    /// known once this returns, whether or not the transfer lands.
    async fn submit_payment(&self, to: &str, amount: f64) -> Result<SubmittedPayment, PaymentError>;

    /// Wait until a submitted transfer is confirmed, fails or outlives the payment timeout
    async fn await_payment(&self, payment: &SubmittedPayment) -> Result<PaymentReceipt, PaymentError>;

    /// Transfer `amount` SOL from the treasury to `to` and wait for confirmation
    async fn send_payment(&self, to: &str, amount: f64) -> Result<PaymentReceipt, PaymentError> {
        let payment = self.submit_payment(to, amount).await?;
        self.await_payment(&payment).await
    }

    async fn verify_transfer(
        &self,
        signature: &str,
        from: &str,
        to: &str,
        min_amount: f64,
    ) -> Result<TransferVerification>;

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus>;

    /// Most recent outgoing treasury transfers, newest first
    async fn treasury_history(&self, limit: usize) -> Result<Vec<TreasuryPayout>>;
}
