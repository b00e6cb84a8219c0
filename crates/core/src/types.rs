//! Domain types for reward calculation, monthly aggregation, and payout
//! settlement. Calculation inputs are immutable snapshots produced by the
//! upstream feedback/fraud pipeline; settlement types track one batch run
//! against the external payout rail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RewardError;

/// Round a currency amount to the smallest unit (cents), half-up.
/// The single rounding point of the pipeline; everything upstream works
/// on unrounded fractions.
pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ─── Calculation inputs ─────────────────────────────────────────────────

/// Quality score for one feedback submission, produced by the upstream
/// evaluation pipeline. All components are on a 0..100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub authenticity: f64,
    pub concreteness: f64,
    pub depth: f64,
    pub total: f64,
    pub confidence: Option<f64>,
}

/// Read-only snapshot of a customer's feedback history at calculation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerHistory {
    pub total_feedbacks: u32,
    pub average_score: f64,
    pub total_rewards_earned: f64,
    pub account_age_days: u32,
    pub suspicious_activity_score: Option<f64>,
}

/// How much fraud exposure a business is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

/// Per-business spending limits applied during calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessConstraints {
    pub max_monthly_budget: Option<f64>,
    pub current_monthly_spent: Option<f64>,
    pub risk_tolerance: Option<RiskTolerance>,
}

/// One verified, reward-eligible feedback occurrence. Created once by the
/// verification workflow, immutable, consumed by the calculator exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardEvent {
    pub event_id: Uuid,
    /// Phone-number-shaped identifier; the aggregation key for settlement.
    pub customer_identifier: String,
    pub business_id: String,
    pub purchase_amount: f64,
    pub business_tier: u8,
    pub quality_score: QualityScore,
    pub customer_history: Option<CustomerHistory>,
    pub business_constraints: Option<BusinessConstraints>,
    pub occurred_at: DateTime<Utc>,
}

// ─── Calculation outputs ────────────────────────────────────────────────

/// Risk classification multiplying the base reward percentage.
/// Ordering is escalation order: the highest matching level wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Quality-score band the event's total score fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardTier {
    /// Score 90..=100, base 8-12%.
    Exceptional,
    /// Score 75..=89, base 4-7%.
    High,
    /// Score 60..=74, base 1-3%.
    Standard,
    /// Score below 60, no reward.
    Ineligible,
}

/// A bonus that increased the reward percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bonus {
    #[serde(rename = "type")]
    pub bonus_type: String,
    /// Percentage points added, as a fraction (0.01 = 1%).
    pub amount: f64,
    pub reason: String,
}

/// A cap or penalty that tightened the outcome. The risk multiplier is
/// reported here as well so the audit trail shows every reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapApplied {
    #[serde(rename = "type")]
    pub cap_type: String,
    pub reason: String,
}

/// Full calculation breakdown for one reward event, exposed for
/// transparency displays and dispute handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardCalculationResult {
    /// Final payable amount, rounded to cents. Always >= 0 and never
    /// above the purchase amount.
    pub reward_amount: f64,
    /// Effective percentage after all bonuses and caps, as a fraction.
    pub reward_percentage: f64,
    /// Tier-interpolated percentage before any adjustment.
    pub base_percentage: f64,
    pub bonuses: Vec<Bonus>,
    pub caps: Vec<CapApplied>,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub tier: RewardTier,
}

// ─── Settlement ─────────────────────────────────────────────────────────

/// Calendar settlement period, `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodKey {
    year: i32,
    month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Result<Self, RewardError> {
        if !(1..=12).contains(&month) {
            return Err(RewardError::Validation(format!(
                "month out of range: {month}"
            )));
        }
        if !(2000..=9999).contains(&year) {
            return Err(RewardError::Validation(format!("year out of range: {year}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodKey {
    type Err = RewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| RewardError::Validation(format!("invalid period key: {s}")))?;
        let year: i32 = year
            .parse()
            .map_err(|_| RewardError::Validation(format!("invalid period key: {s}")))?;
        let month: u32 = month
            .parse()
            .map_err(|_| RewardError::Validation(format!("invalid period key: {s}")))?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = RewardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodKey> for String {
    fn from(value: PeriodKey) -> Self {
        value.to_string()
    }
}

/// Per-business subtotal inside an aggregation, for audit and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessBreakdown {
    pub business_id: String,
    pub amount: f64,
    pub count: u32,
}

/// One customer's payable total for one settlement period. Rebuilt fresh
/// each settlement run from the period's approved events; a re-run over
/// the same event set reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAggregation {
    pub customer_identifier: String,
    pub period: PeriodKey,
    pub total_amount: f64,
    pub source_event_ids: Vec<Uuid>,
    pub business_breakdown: Vec<BusinessBreakdown>,
}

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    /// Every item reached a terminal payout status, whatever the mix.
    Completed,
    /// Processing stopped before the item list was exhausted.
    Failed,
}

/// One settlement run covering all aggregations for a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentBatch {
    pub batch_id: Uuid,
    pub period: PeriodKey,
    pub created_at: DateTime<Utc>,
    pub total_aggregations: u32,
    pub total_amount: f64,
    pub status: BatchStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub provider_batch_ref: Option<String>,
    pub results: Option<Vec<PayoutAttempt>>,
}

/// Payout lifecycle state at the rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Created,
    Submitted,
    Paid,
    Declined,
    Error,
}

impl PayoutStatus {
    /// No further transitions happen from these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Declined | Self::Error)
    }
}

/// One payout submission for one aggregation within one batch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutAttempt {
    /// Globally unique settlement reference.
    pub reference: String,
    pub customer_identifier: String,
    pub amount: f64,
    pub status: PayoutStatus,
    pub provider_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Batch outcome summary consumed by billing and dashboard collaborators.
/// For a completed batch, `successful_payments + failed_payments` always
/// equals `total_payments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub batch_id: Uuid,
    pub period: PeriodKey,
    pub total_payments: u32,
    pub successful_payments: u32,
    pub failed_payments: u32,
    pub total_amount: f64,
    pub results: Vec<PayoutAttempt>,
}
