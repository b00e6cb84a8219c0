//! Batch settlement engine. Drives one period's aggregations through the
//! payout rail sequentially: reference generation, payee normalization,
//! submission with bounded retry, then polling each payout to a terminal
//! state. Per-item failures are recorded and the batch proceeds; only
//! batch-level faults (period lock conflict, cancellation) fail the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use feedback_core::config::{AppConfig, PayoutConfig, SettlementConfig};
use feedback_core::error::{RewardError, RewardResult};
use feedback_core::types::{
    round_to_cents, BatchStatus, PaymentAggregation, PaymentBatch, PayoutAttempt, PayoutStatus,
    PeriodKey, ReconciliationReport,
};

use crate::payout::{
    amount_string, submit_with_retry, PayoutRail, PayoutRailError, PayoutRequest,
};
use crate::phone::normalize_msisdn;
use crate::reference::{ReferenceGenerator, ReferenceStore};
use crate::retry::RetryPolicy;

/// Cooperative cancellation for a batch run. Checked at item boundaries
/// only: a submitted payout is always polled to a terminal state before
/// the batch is abandoned, so no external side effect is left unresolved.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Advisory lock guaranteeing at most one settlement run per period.
struct PeriodGuard<'a> {
    locks: &'a DashMap<PeriodKey, ()>,
    period: PeriodKey,
}

impl<'a> PeriodGuard<'a> {
    fn acquire(locks: &'a DashMap<PeriodKey, ()>, period: &PeriodKey) -> RewardResult<Self> {
        match locks.entry(period.clone()) {
            Entry::Occupied(_) => Err(RewardError::PeriodLocked(period.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(Self {
                    locks,
                    period: period.clone(),
                })
            }
        }
    }
}

impl Drop for PeriodGuard<'_> {
    fn drop(&mut self) {
        self.locks.remove(&self.period);
    }
}

/// Settlement engine for one payout rail client. Constructed per run
/// context with an explicit rail and reference store; there is no
/// process-wide singleton. Batches for different periods may run
/// concurrently on one engine; a second run for the same period is
/// rejected up front.
pub struct BatchSettlementEngine<R, S> {
    settlement: SettlementConfig,
    payout: PayoutConfig,
    retry: RetryPolicy,
    rail: R,
    references: ReferenceGenerator<S>,
    active_periods: DashMap<PeriodKey, ()>,
    batches: DashMap<Uuid, PaymentBatch>,
}

impl<R: PayoutRail, S: ReferenceStore> BatchSettlementEngine<R, S> {
    pub fn new(config: &AppConfig, retry: RetryPolicy, rail: R, store: Arc<S>) -> Self {
        info!(
            currency = %config.payout.currency,
            poll_interval_ms = config.settlement.poll_interval_ms,
            poll_timeout_ms = config.settlement.poll_timeout_ms,
            "Batch settlement engine initialized"
        );
        let references = ReferenceGenerator::new(
            store,
            retry.clone(),
            config.settlement.reference_max_attempts,
        );
        Self {
            settlement: config.settlement.clone(),
            payout: config.payout.clone(),
            retry,
            rail,
            references,
            active_periods: DashMap::new(),
            batches: DashMap::new(),
        }
    }

    /// Settle one period's aggregations. Returns the reconciliation report
    /// for a completed batch; a batch-level fault (period already running,
    /// cancellation mid-list) marks the batch failed and returns the error.
    pub async fn settle_period(
        &self,
        period: &PeriodKey,
        aggregations: &[PaymentAggregation],
        cancel: &CancellationToken,
    ) -> RewardResult<ReconciliationReport> {
        let _guard = PeriodGuard::acquire(&self.active_periods, period)?;

        let batch_id = Uuid::new_v4();
        let total_amount = round_to_cents(aggregations.iter().map(|a| a.total_amount).sum());
        let mut batch = PaymentBatch {
            batch_id,
            period: period.clone(),
            created_at: Utc::now(),
            total_aggregations: aggregations.len() as u32,
            total_amount,
            status: BatchStatus::Pending,
            processed_at: None,
            provider_batch_ref: None,
            results: None,
        };
        self.batches.insert(batch_id, batch.clone());

        batch.status = BatchStatus::Processing;
        self.batches.insert(batch_id, batch.clone());
        info!(
            batch_id = %batch_id,
            period = %period,
            items = aggregations.len(),
            total = total_amount,
            "Settlement batch started"
        );

        let scope = reference_scope(&batch_id);
        let mut results: Vec<PayoutAttempt> = Vec::with_capacity(aggregations.len());
        let mut cancelled = false;

        for (index, aggregation) in aggregations.iter().enumerate() {
            // Cancellation is honored between items only; never mid-item.
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let attempt = self.process_item(&scope, aggregation).await;
            metrics::counter!(
                "settlement.payout_outcomes",
                "status" => status_label(attempt.status)
            )
            .increment(1);
            results.push(attempt);

            if index + 1 < aggregations.len() {
                tokio::time::sleep(Duration::from_millis(self.settlement.inter_item_delay_ms))
                    .await;
            }
        }

        batch.processed_at = Some(Utc::now());
        if cancelled {
            batch.status = BatchStatus::Failed;
            batch.results = Some(results.clone());
            self.batches.insert(batch_id, batch);
            warn!(
                batch_id = %batch_id,
                period = %period,
                processed = results.len(),
                remaining = aggregations.len() - results.len(),
                "Settlement batch cancelled; remaining items left unprocessed"
            );
            return Err(RewardError::BatchAborted(format!(
                "cancelled after {} of {} items",
                results.len(),
                aggregations.len()
            )));
        }

        batch.status = BatchStatus::Completed;
        batch.results = Some(results.clone());
        self.batches.insert(batch_id, batch);

        let successful_payments = results
            .iter()
            .filter(|r| r.status == PayoutStatus::Paid)
            .count() as u32;
        let total_payments = results.len() as u32;
        let report = ReconciliationReport {
            batch_id,
            period: period.clone(),
            total_payments,
            successful_payments,
            failed_payments: total_payments - successful_payments,
            total_amount,
            results,
        };
        info!(
            batch_id = %batch_id,
            period = %period,
            total = report.total_payments,
            paid = report.successful_payments,
            failed = report.failed_payments,
            "Settlement batch completed"
        );
        Ok(report)
    }

    /// Settle one aggregation. Never returns an error: every failure mode
    /// ends as a recorded terminal attempt and the batch moves on.
    async fn process_item(&self, scope: &str, aggregation: &PaymentAggregation) -> PayoutAttempt {
        let reference = match self.references.next(scope).await {
            Ok(reference) => reference,
            Err(err) => {
                return failed_attempt(
                    format!("unassigned-{}", Uuid::new_v4()),
                    aggregation,
                    "reference_exhausted",
                    &err.to_string(),
                );
            }
        };

        let payee = match normalize_msisdn(
            &aggregation.customer_identifier,
            &self.payout.default_country_code,
        ) {
            Ok(payee) => payee,
            Err(err) => {
                return failed_attempt(reference, aggregation, "invalid_msisdn", &err.to_string());
            }
        };

        if aggregation.total_amount <= 0.0 {
            return failed_attempt(
                reference,
                aggregation,
                "invalid_amount",
                "aggregation amount must be positive",
            );
        }

        let request = PayoutRequest {
            reference: reference.clone(),
            payee,
            amount: amount_string(aggregation.total_amount),
            currency: self.payout.currency.clone(),
            message: self.payout.payout_message.clone(),
        };
        metrics::counter!("settlement.payouts_submitted").increment(1);
        let created = match submit_with_retry(&self.rail, &request, &self.retry).await {
            Ok(created) => created,
            Err(PayoutRailError::Transient(message)) => {
                return failed_attempt(reference, aggregation, "submit_failed", &message);
            }
            Err(PayoutRailError::Rejected { code, message }) => {
                return failed_attempt(reference, aggregation, &code, &message);
            }
        };

        let (status, error_code, error_message) = if created.status.is_terminal() {
            (created.status, None, None)
        } else {
            self.poll_until_terminal(&created.id).await
        };

        info!(
            reference = %reference,
            provider_id = %created.id,
            status = ?status,
            amount = aggregation.total_amount,
            "Payout reached terminal state"
        );

        PayoutAttempt {
            reference,
            customer_identifier: aggregation.customer_identifier.clone(),
            amount: aggregation.total_amount,
            status,
            provider_id: Some(created.id),
            error_code,
            error_message,
        }
    }

    /// Poll one payout until the rail reports a terminal status or the
    /// polling budget runs out. Budget exhaustion is an `error` with its
    /// own code, distinct from a decline.
    async fn poll_until_terminal(
        &self,
        provider_id: &str,
    ) -> (PayoutStatus, Option<String>, Option<String>) {
        let interval = Duration::from_millis(self.settlement.poll_interval_ms);
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.settlement.poll_timeout_ms);

        loop {
            match self.rail.payout_status(provider_id).await {
                Ok(update) if update.status.is_terminal() => {
                    return (update.status, update.error_code, update.error_message);
                }
                Ok(_) => {}
                Err(PayoutRailError::Rejected { code, message }) => {
                    return (PayoutStatus::Error, Some(code), Some(message));
                }
                Err(err) => {
                    // Transient poll failures consume the budget, not an
                    // attempt counter.
                    warn!(provider_id = %provider_id, error = %err, "Status poll failed");
                }
            }

            if tokio::time::Instant::now() + interval > deadline {
                return (
                    PayoutStatus::Error,
                    Some("poll_timeout".to_string()),
                    Some("payout did not complete in time".to_string()),
                );
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Look up a past or in-flight batch record.
    pub fn batch(&self, batch_id: Uuid) -> Option<PaymentBatch> {
        self.batches.get(&batch_id).map(|b| b.clone())
    }

    /// All batch records for a period, oldest first.
    pub fn batches_for_period(&self, period: &PeriodKey) -> Vec<PaymentBatch> {
        let mut batches: Vec<PaymentBatch> = self
            .batches
            .iter()
            .filter(|entry| &entry.value().period == period)
            .map(|entry| entry.value().clone())
            .collect();
        batches.sort_by_key(|b| b.created_at);
        batches
    }
}

fn reference_scope(batch_id: &Uuid) -> String {
    let simple = batch_id.simple().to_string();
    format!("RWD{}", &simple[..8])
}

fn failed_attempt(
    reference: String,
    aggregation: &PaymentAggregation,
    code: &str,
    message: &str,
) -> PayoutAttempt {
    warn!(
        reference = %reference,
        customer = %aggregation.customer_identifier,
        code = %code,
        "Payout attempt failed: {message}"
    );
    PayoutAttempt {
        reference,
        customer_identifier: aggregation.customer_identifier.clone(),
        amount: aggregation.total_amount,
        status: PayoutStatus::Error,
        provider_id: None,
        error_code: Some(code.to_string()),
        error_message: Some(message.to_string()),
    }
}

fn status_label(status: PayoutStatus) -> &'static str {
    match status {
        PayoutStatus::Created => "created",
        PayoutStatus::Submitted => "submitted",
        PayoutStatus::Paid => "paid",
        PayoutStatus::Declined => "declined",
        PayoutStatus::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::{PayoutCreated, PayoutStatusUpdate};
    use crate::reference::InMemoryReferenceStore;
    use std::collections::HashMap;

    /// Scripted rail: behavior keyed by payee identifier.
    #[derive(Clone)]
    enum Script {
        /// Created as submitted, reported paid on the first poll.
        Paid,
        /// Created as submitted, reported declined on the first poll.
        Declined { code: &'static str },
        /// Submission fails transiently this many times, then paid.
        FlakyThenPaid { failures: u32 },
        /// Submission always rejected outright.
        RejectedOnSubmit { code: &'static str },
        /// Never reaches a terminal status; polling must time out.
        NeverTerminal,
    }

    #[derive(Default)]
    struct ScriptedRail {
        scripts: HashMap<String, Script>,
        submit_failures: DashMap<String, u32>,
    }

    impl ScriptedRail {
        fn with(mut self, payee: &str, script: Script) -> Self {
            self.scripts.insert(payee.to_string(), script);
            self
        }

        fn script_for(&self, payee: &str) -> Script {
            self.scripts.get(payee).cloned().unwrap_or(Script::Paid)
        }
    }

    impl PayoutRail for ScriptedRail {
        async fn create_payout(
            &self,
            request: &PayoutRequest,
        ) -> Result<PayoutCreated, PayoutRailError> {
            match self.script_for(&request.payee) {
                Script::RejectedOnSubmit { code } => Err(PayoutRailError::Rejected {
                    code: code.to_string(),
                    message: "rejected by rail".to_string(),
                }),
                Script::FlakyThenPaid { failures } => {
                    let mut seen = self
                        .submit_failures
                        .entry(request.payee.clone())
                        .or_insert(0);
                    if *seen < failures {
                        *seen += 1;
                        Err(PayoutRailError::Transient("503".to_string()))
                    } else {
                        Ok(PayoutCreated {
                            id: format!("prov-{}", request.payee),
                            status: PayoutStatus::Submitted,
                        })
                    }
                }
                _ => Ok(PayoutCreated {
                    id: format!("prov-{}", request.payee),
                    status: PayoutStatus::Submitted,
                }),
            }
        }

        async fn payout_status(
            &self,
            id: &str,
        ) -> Result<PayoutStatusUpdate, PayoutRailError> {
            let payee = id.trim_start_matches("prov-");
            let update = match self.script_for(payee) {
                Script::Declined { code } => PayoutStatusUpdate {
                    status: PayoutStatus::Declined,
                    error_code: Some(code.to_string()),
                    error_message: Some("insufficient wallet capacity".to_string()),
                },
                Script::NeverTerminal => PayoutStatusUpdate {
                    status: PayoutStatus::Submitted,
                    error_code: None,
                    error_message: None,
                },
                _ => PayoutStatusUpdate {
                    status: PayoutStatus::Paid,
                    error_code: None,
                    error_message: None,
                },
            };
            Ok(update)
        }
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.settlement.inter_item_delay_ms = 0;
        config.settlement.poll_interval_ms = 1;
        config.settlement.poll_timeout_ms = 20;
        config
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    fn engine(rail: ScriptedRail) -> BatchSettlementEngine<ScriptedRail, InMemoryReferenceStore> {
        BatchSettlementEngine::new(
            &fast_config(),
            fast_retry(),
            rail,
            Arc::new(InMemoryReferenceStore::new()),
        )
    }

    fn aggregation(customer: &str, amount: f64) -> PaymentAggregation {
        PaymentAggregation {
            customer_identifier: customer.to_string(),
            period: "2025-06".parse().unwrap(),
            total_amount: amount,
            source_event_ids: vec![Uuid::new_v4()],
            business_breakdown: vec![],
        }
    }

    #[tokio::test]
    async fn test_completed_batch_accounting_holds() {
        let rail = ScriptedRail::default()
            .with("+254700000001", Script::Paid)
            .with("+254700000002", Script::Declined { code: "401" })
            .with("+254700000003", Script::FlakyThenPaid { failures: 2 });
        let engine = engine(rail);
        let period: PeriodKey = "2025-06".parse().unwrap();
        let aggregations = vec![
            aggregation("+254700000001", 24.75),
            aggregation("+254700000002", 45.0),
            aggregation("+254700000003", 12.5),
            aggregation("bad identifier!", 9.0),
        ];

        let report = engine
            .settle_period(&period, &aggregations, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total_payments, 4);
        assert_eq!(report.successful_payments, 2);
        assert_eq!(report.failed_payments, 2);
        assert_eq!(
            report.successful_payments + report.failed_payments,
            report.total_payments
        );
        assert_eq!(report.results.len(), 4);

        // Every outcome is terminal and present in the report.
        assert!(report.results.iter().all(|r| r.status.is_terminal()));
        let declined = &report.results[1];
        assert_eq!(declined.status, PayoutStatus::Declined);
        assert_eq!(declined.error_code.as_deref(), Some("401"));
        let invalid = &report.results[3];
        assert_eq!(invalid.status, PayoutStatus::Error);
        assert_eq!(invalid.error_code.as_deref(), Some("invalid_msisdn"));
        assert!(invalid.provider_id.is_none());

        let batch = engine.batches_for_period(&period).pop().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert!(batch.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_error_not_declined() {
        let rail = ScriptedRail::default().with("+254700000009", Script::NeverTerminal);
        let engine = engine(rail);
        let period: PeriodKey = "2025-07".parse().unwrap();

        let report = engine
            .settle_period(
                &period,
                &[aggregation("+254700000009", 30.0)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let attempt = &report.results[0];
        assert_eq!(attempt.status, PayoutStatus::Error);
        assert_eq!(attempt.error_code.as_deref(), Some("poll_timeout"));
        assert!(attempt.provider_id.is_some());
    }

    #[tokio::test]
    async fn test_rejected_submission_is_terminal_item_error() {
        let rail = ScriptedRail::default()
            .with("+254700000004", Script::RejectedOnSubmit { code: "INVALID_PAYEE" });
        let engine = engine(rail);
        let period: PeriodKey = "2025-08".parse().unwrap();

        let report = engine
            .settle_period(
                &period,
                &[aggregation("+254700000004", 18.0)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let attempt = &report.results[0];
        assert_eq!(attempt.status, PayoutStatus::Error);
        assert_eq!(attempt.error_code.as_deref(), Some("INVALID_PAYEE"));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_before_any_network_call() {
        let engine = engine(ScriptedRail::default());
        let period: PeriodKey = "2025-09".parse().unwrap();

        let report = engine
            .settle_period(
                &period,
                &[aggregation("+254700000005", 0.0)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let attempt = &report.results[0];
        assert_eq!(attempt.status, PayoutStatus::Error);
        assert_eq!(attempt.error_code.as_deref(), Some("invalid_amount"));
        assert!(attempt.provider_id.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_between_items_fails_batch() {
        let engine = engine(ScriptedRail::default());
        let period: PeriodKey = "2025-10".parse().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .settle_period(
                &period,
                &[
                    aggregation("+254700000001", 10.0),
                    aggregation("+254700000002", 11.0),
                ],
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RewardError::BatchAborted(_)));
        let batch = engine.batches_for_period(&period).pop().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        // Nothing was processed and nothing is reported as succeeded.
        assert_eq!(batch.results.as_deref().unwrap().len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_period_cannot_settle_concurrently() {
        struct GatedRail {
            release: Arc<tokio::sync::Notify>,
            entered: Arc<tokio::sync::Notify>,
        }

        impl PayoutRail for GatedRail {
            async fn create_payout(
                &self,
                request: &PayoutRequest,
            ) -> Result<PayoutCreated, PayoutRailError> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(PayoutCreated {
                    id: format!("prov-{}", request.reference),
                    status: PayoutStatus::Paid,
                })
            }

            async fn payout_status(
                &self,
                _id: &str,
            ) -> Result<PayoutStatusUpdate, PayoutRailError> {
                Ok(PayoutStatusUpdate {
                    status: PayoutStatus::Paid,
                    error_code: None,
                    error_message: None,
                })
            }
        }

        let release = Arc::new(tokio::sync::Notify::new());
        let entered = Arc::new(tokio::sync::Notify::new());
        let rail = GatedRail {
            release: release.clone(),
            entered: entered.clone(),
        };
        let engine = Arc::new(BatchSettlementEngine::new(
            &fast_config(),
            fast_retry(),
            rail,
            Arc::new(InMemoryReferenceStore::new()),
        ));
        let period: PeriodKey = "2025-11".parse().unwrap();

        let first = {
            let engine = engine.clone();
            let period = period.clone();
            tokio::spawn(async move {
                engine
                    .settle_period(
                        &period,
                        &[aggregation("+254700000001", 10.0)],
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        // Wait until the first run holds the period lock inside an item.
        entered.notified().await;

        let second = engine
            .settle_period(
                &period,
                &[aggregation("+254700000002", 11.0)],
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(second, Err(RewardError::PeriodLocked(_))));

        release.notify_one();
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.successful_payments, 1);

        // Lock released after completion: the period can settle again.
        release.notify_one();
        let report = engine
            .settle_period(
                &period,
                &[aggregation("+254700000003", 12.0)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.total_payments, 1);
    }
}
