//! Monthly aggregation of approved reward events into one payable total
//! per customer. A pure function of the closed event set: re-running it
//! over unchanged input reproduces the same aggregations byte for byte,
//! and a fresh run over a grown set fully supersedes any prior run.

use std::collections::BTreeMap;

use tracing::info;
use uuid::Uuid;

use feedback_core::types::{
    round_to_cents, BusinessBreakdown, PaymentAggregation, PeriodKey, RewardCalculationResult,
    RewardEvent,
};

/// Period-level counters exposed to dashboards alongside the payables.
/// Zero-reward events never become payout attempts but still count here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeriodStats {
    pub total_events: u32,
    pub payable_events: u32,
    pub zero_reward_events: u32,
    pub unique_customers: u32,
    pub gross_amount: f64,
}

/// The result of one aggregation run over a closed period.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PeriodAggregation {
    pub period: PeriodKey,
    pub aggregations: Vec<PaymentAggregation>,
    pub stats: PeriodStats,
}

/// Group a closed period's approved events by customer identifier.
///
/// The caller guarantees the period is closed (all events through fraud and
/// manual review) and that each event appears at most once in `events`.
/// Output ordering is deterministic: customers sorted by identifier, source
/// event ids and business breakdowns sorted within each aggregation.
pub fn aggregate_period(
    period: &PeriodKey,
    events: &[(RewardEvent, RewardCalculationResult)],
) -> PeriodAggregation {
    let mut by_customer: BTreeMap<&str, CustomerBucket> = BTreeMap::new();
    let mut zero_reward_events = 0u32;
    let mut gross_amount = 0.0f64;

    for (event, result) in events {
        if result.reward_amount == 0.0 {
            zero_reward_events += 1;
            continue;
        }
        gross_amount += result.reward_amount;

        let bucket = by_customer
            .entry(event.customer_identifier.as_str())
            .or_default();
        bucket.total += result.reward_amount;
        bucket.event_ids.push(event.event_id);
        let business = bucket.businesses.entry(event.business_id.clone()).or_default();
        business.0 += result.reward_amount;
        business.1 += 1;
    }

    let aggregations: Vec<PaymentAggregation> = by_customer
        .into_iter()
        .map(|(customer, mut bucket)| {
            bucket.event_ids.sort_unstable();
            PaymentAggregation {
                customer_identifier: customer.to_string(),
                period: period.clone(),
                total_amount: round_to_cents(bucket.total),
                source_event_ids: bucket.event_ids,
                business_breakdown: bucket
                    .businesses
                    .into_iter()
                    .map(|(business_id, (amount, count))| BusinessBreakdown {
                        business_id,
                        amount: round_to_cents(amount),
                        count,
                    })
                    .collect(),
            }
        })
        .collect();

    let stats = PeriodStats {
        total_events: events.len() as u32,
        payable_events: events.len() as u32 - zero_reward_events,
        zero_reward_events,
        unique_customers: aggregations.len() as u32,
        gross_amount: round_to_cents(gross_amount),
    };

    metrics::counter!("settlement.aggregation_runs").increment(1);
    info!(
        period = %period,
        customers = stats.unique_customers,
        payable = stats.payable_events,
        skipped = stats.zero_reward_events,
        gross = stats.gross_amount,
        "Period aggregated"
    );

    PeriodAggregation {
        period: period.clone(),
        aggregations,
        stats,
    }
}

#[derive(Default)]
struct CustomerBucket {
    total: f64,
    event_ids: Vec<Uuid>,
    /// business id -> (amount, count), sorted for reproducible output.
    businesses: BTreeMap<String, (f64, u32)>,
}
