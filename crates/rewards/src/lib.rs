//! Pure reward computation: risk assessment over customer history and the
//! deterministic reward-amount calculation for verified feedback events.
//! No I/O; safe to run with unbounded parallelism.

pub mod calculator;
pub mod risk;

pub use calculator::RewardCalculator;
pub use risk::{assess_risk, RiskAssessment};
