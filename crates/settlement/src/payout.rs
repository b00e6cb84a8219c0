//! Client contract for the external payout rail. The engine is a client
//! of the rail's request/response and polling surface only; transport and
//! crypto belong to the rail adapter implementing [`PayoutRail`].

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use feedback_core::types::PayoutStatus;

use crate::retry::RetryPolicy;

/// One payout submission. `amount` is a decimal string; the rail rejects
/// binary floats on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub reference: String,
    /// E.164 payee identifier, normalized before submission.
    pub payee: String,
    pub amount: String,
    pub currency: String,
    pub message: String,
}

/// Rail acknowledgement of a created payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutCreated {
    pub id: String,
    pub status: PayoutStatus,
}

/// A polled status update for an in-flight payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutStatusUpdate {
    pub status: PayoutStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Failures talking to the rail. Transient failures may be retried with
/// backoff; rejections are semantic and must never be retried.
#[derive(Debug, Clone, Error)]
pub enum PayoutRailError {
    #[error("transient payout rail failure: {0}")]
    Transient(String),

    #[error("payout rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl PayoutRailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The payout rail's request/response and polling contract.
pub trait PayoutRail: Send + Sync {
    /// Submit a payout. The rail deduplicates on `request.reference`.
    fn create_payout(
        &self,
        request: &PayoutRequest,
    ) -> impl Future<Output = Result<PayoutCreated, PayoutRailError>> + Send;

    /// Fetch the current status of a previously created payout.
    fn payout_status(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<PayoutStatusUpdate, PayoutRailError>> + Send;
}

/// Drive `create_payout` through the retry policy. Only transient failures
/// consume the attempt budget; a rejection returns immediately.
pub async fn submit_with_retry<R: PayoutRail>(
    rail: &R,
    request: &PayoutRequest,
    policy: &RetryPolicy,
) -> Result<PayoutCreated, PayoutRailError> {
    let mut attempt = 0;
    loop {
        match rail.create_payout(request).await {
            Ok(created) => return Ok(created),
            Err(err) if err.is_transient() && policy.allows_retry(attempt) => {
                warn!(
                    reference = %request.reference,
                    attempt = attempt + 1,
                    error = %err,
                    "Transient submission failure, backing off"
                );
                metrics::counter!("settlement.submission_retries").increment(1);
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Format a currency amount as the rail's decimal string.
pub fn amount_string(amount: f64) -> String {
    format!("{amount:.2}")
}
