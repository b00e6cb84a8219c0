//! Monthly reward settlement: per-customer aggregation, idempotent batch
//! submission to the external payout rail, polling to terminal state, and
//! reconciliation reporting.

pub mod aggregator;
pub mod batch;
pub mod payout;
pub mod phone;
pub mod reference;
pub mod retry;

pub use aggregator::{aggregate_period, PeriodAggregation, PeriodStats};
pub use batch::{BatchSettlementEngine, CancellationToken};
pub use payout::{PayoutRail, PayoutRailError, PayoutRequest};
pub use reference::{InMemoryReferenceStore, ReferenceGenerator, ReferenceStore};
pub use retry::RetryPolicy;
