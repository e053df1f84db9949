//! Payment gateway seam.
//!
//! The booking core charges and refunds through [`PaymentGateway`]. Every call
//! carries an idempotency key so a retried request has effect at most once on
//! the provider side. [`MockPaymentGateway`] honours the same contract in memory
//! and is used in development and tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The provider refused the operation; retrying will not help.
    #[error("payment declined: {0}")]
    Declined(String),

    /// Timeout or provider outage; safe to retry with the same idempotency key.
    #[error("payment provider unavailable: {0}")]
    Transient(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Declined(reason) => AppError::PaymentDeclined(reason),
            GatewayError::Transient(reason) => {
                AppError::ExternalService(format!("payment provider unavailable: {}", reason))
            }
        }
    }
}

/// Payment gateway result
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Abstraction over the payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` minor units to `customer`, returning the payment reference.
    async fn charge(
        &self,
        amount: i64,
        customer: Uuid,
        idempotency_key: &str,
    ) -> GatewayResult<String>;

    /// Refunds `amount` of a previous charge, returning the refund reference.
    async fn refund(
        &self,
        payment_ref: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> GatewayResult<String>;
}

/// Runs `call` up to `max_attempts` times, backing off exponentially between
/// transient failures. The closure must reuse the same idempotency key.
pub async fn with_retries<T, F, Fut>(max_attempts: u32, mut call: F) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut attempt = 1;
    let mut backoff = Duration::from_millis(100);
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!("⚠️  Gateway attempt {} failed: {} - retrying", attempt, e);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[derive(Default)]
struct MockLedger {
    charges: HashMap<String, String>,
    refunds: HashMap<String, String>,
    refunded_amounts: HashMap<String, i64>,
    pending_failures: u32,
    refused_refunds: HashSet<String>,
}

/// In-memory gateway that always succeeds unless failures are queued.
///
/// Replays the stored reference for a repeated idempotency key, so the
/// number of distinct charges and refunds reflects real side effects.
#[derive(Clone, Default)]
pub struct MockPaymentGateway {
    ledger: Arc<Mutex<MockLedger>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with a transient error.
    pub async fn fail_next(&self, count: u32) {
        self.ledger.lock().await.pending_failures = count;
    }

    /// Makes every refund of `payment_ref` fail with a decline.
    pub async fn refuse_refunds_of(&self, payment_ref: &str) {
        self.ledger
            .lock()
            .await
            .refused_refunds
            .insert(payment_ref.to_string());
    }

    /// Number of distinct charges performed.
    pub async fn charge_count(&self) -> usize {
        self.ledger.lock().await.charges.len()
    }

    /// Number of distinct refunds performed.
    pub async fn refund_count(&self) -> usize {
        self.ledger.lock().await.refunds.len()
    }

    /// Total refunded against `payment_ref`.
    pub async fn refunded_amount(&self, payment_ref: &str) -> i64 {
        self.ledger
            .lock()
            .await
            .refunded_amounts
            .get(payment_ref)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(
        &self,
        amount: i64,
        customer: Uuid,
        idempotency_key: &str,
    ) -> GatewayResult<String> {
        let mut ledger = self.ledger.lock().await;
        if ledger.pending_failures > 0 {
            ledger.pending_failures -= 1;
            return Err(GatewayError::Transient("simulated timeout".to_string()));
        }
        if amount <= 0 {
            return Err(GatewayError::Declined("amount must be positive".to_string()));
        }
        if let Some(existing) = ledger.charges.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let payment_ref = format!("mock_pay_{}", Uuid::new_v4());
        ledger
            .charges
            .insert(idempotency_key.to_string(), payment_ref.clone());

        tracing::info!(
            customer = %customer,
            amount,
            payment_ref = %payment_ref,
            "Mock charge processed"
        );
        Ok(payment_ref)
    }

    async fn refund(
        &self,
        payment_ref: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> GatewayResult<String> {
        let mut ledger = self.ledger.lock().await;
        if ledger.pending_failures > 0 {
            ledger.pending_failures -= 1;
            return Err(GatewayError::Transient("simulated timeout".to_string()));
        }
        if ledger.refused_refunds.contains(payment_ref) {
            return Err(GatewayError::Declined("refund refused by issuer".to_string()));
        }
        if let Some(existing) = ledger.refunds.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let refund_ref = format!("mock_refund_{}", Uuid::new_v4());
        ledger
            .refunds
            .insert(idempotency_key.to_string(), refund_ref.clone());
        *ledger
            .refunded_amounts
            .entry(payment_ref.to_string())
            .or_insert(0) += amount;

        tracing::info!(
            payment_ref = %payment_ref,
            amount,
            refund_ref = %refund_ref,
            "Mock refund processed"
        );
        Ok(refund_ref)
    }
}
