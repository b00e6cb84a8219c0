//! Risk assessment over a customer's feedback history. Consumed by the
//! reward calculator as a multiplicative penalty on the base percentage.

use feedback_core::types::{CustomerHistory, RiskLevel};

/// Outcome of assessing one customer's history. Every matching factor is
/// reported; the level is the highest escalation among them.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub factors: Vec<String>,
}

/// Classify a customer's fraud exposure from their history snapshot.
/// Rules are evaluated independently; the highest matching level wins and
/// all matching factors are reported. Absent history is itself a medium
/// signal. This consumes the upstream fraud screen's output; it does not
/// decide whether a submission is fraudulent.
pub fn assess_risk(history: Option<&CustomerHistory>) -> RiskAssessment {
    let Some(history) = history else {
        return RiskAssessment {
            level: RiskLevel::Medium,
            factors: vec!["new customer, no history".to_string()],
        };
    };

    let mut level = RiskLevel::Low;
    let mut factors = Vec::new();
    let mut escalate = |candidate: RiskLevel, factor: &str, factors: &mut Vec<String>| {
        factors.push(factor.to_string());
        if candidate > level {
            level = candidate;
        }
    };

    if history.account_age_days < 7 {
        escalate(RiskLevel::High, "account younger than 7 days", &mut factors);
    }

    let feedbacks_per_day =
        f64::from(history.total_feedbacks) / f64::from(history.account_age_days.max(1));
    if feedbacks_per_day > 3.0 {
        escalate(
            RiskLevel::High,
            "unusually high feedback frequency",
            &mut factors,
        );
    }

    if history.average_score > 90.0 && history.total_feedbacks > 10 {
        escalate(
            RiskLevel::Medium,
            "unusually consistent high scores",
            &mut factors,
        );
    }

    if history
        .suspicious_activity_score
        .map(|s| s > 0.7)
        .unwrap_or(false)
    {
        escalate(
            RiskLevel::High,
            "elevated suspicious activity score",
            &mut factors,
        );
    }

    RiskAssessment { level, factors }
}
