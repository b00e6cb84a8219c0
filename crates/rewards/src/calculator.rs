//! Deterministic reward calculation. One fixed pipeline per event: tier
//! interpolation, risk multiplier, bonuses, ordered cap application, then
//! a single half-up rounding to cents. The step order is load-bearing:
//! re-running the calculator on identical input reproduces the result
//! exactly, and auditors replay it from the recorded bonuses and caps.

use feedback_core::config::RewardConfig;
use feedback_core::types::{
    round_to_cents, Bonus, CapApplied, RewardCalculationResult, RewardEvent, RewardTier, RiskLevel,
};
use tracing::debug;

use crate::risk::assess_risk;

/// Quality-score bands: (band floor, band ceiling, min pct, max pct).
/// Scores below 60 earn nothing regardless of any other factor.
const TIER_BANDS: [(f64, f64, f64, f64, RewardTier); 3] = [
    (90.0, 100.0, 0.08, 0.12, RewardTier::Exceptional),
    (75.0, 89.0, 0.04, 0.07, RewardTier::High),
    (60.0, 74.0, 0.01, 0.03, RewardTier::Standard),
];

/// Loyalty gates: each matched gate adds half a percentage point, with the
/// total loyalty bonus capped at two points.
const LOYALTY_INCREMENT: f64 = 0.005;
const LOYALTY_CAP: f64 = 0.02;

/// Reward calculator — stateless computation over reward events.
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: &RewardConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Map a quality score to its band and linearly interpolated base
    /// percentage.
    fn base_percentage(total: f64) -> (f64, RewardTier) {
        let total = total.clamp(0.0, 100.0);
        for (floor, ceiling, min_pct, max_pct, tier) in TIER_BANDS {
            if total >= floor {
                let position = if ceiling > floor {
                    (total.min(ceiling) - floor) / (ceiling - floor)
                } else {
                    0.0
                };
                return (min_pct + position * (max_pct - min_pct), tier);
            }
        }
        (0.0, RewardTier::Ineligible)
    }

    /// Compute the full reward breakdown for one event.
    pub fn calculate(&self, event: &RewardEvent) -> RewardCalculationResult {
        let mut bonuses = Vec::new();
        let mut caps = Vec::new();

        // Step 1: tier lookup with in-band interpolation.
        let (base_percentage, tier) = Self::base_percentage(event.quality_score.total);
        let mut percentage = base_percentage;

        // Step 2: risk adjustment. A multiplicative penalty, but reported
        // alongside caps so the audit trail shows every reduction.
        let assessment = assess_risk(event.customer_history.as_ref());
        let multiplier = match assessment.level {
            RiskLevel::High => 0.5,
            RiskLevel::Medium => 0.75,
            RiskLevel::Low => 1.0,
        };
        if multiplier < 1.0 && percentage > 0.0 {
            percentage *= multiplier;
            caps.push(CapApplied {
                cap_type: "risk_adjustment".to_string(),
                reason: format!(
                    "{:?} risk reduced reward to {:.0}% of base",
                    assessment.level,
                    multiplier * 100.0
                ),
            });
        }

        // Step 3: business-tier bonus, at most 3 points.
        if event.business_tier > 1 {
            let bonus = (f64::from(event.business_tier - 1) * 0.01).min(0.03);
            percentage += bonus;
            bonuses.push(Bonus {
                bonus_type: "business_tier".to_string(),
                amount: bonus,
                reason: format!("business tier {} partnership bonus", event.business_tier),
            });
        }

        // Step 4: loyalty bonus, only for customers with history.
        if let Some(history) = &event.customer_history {
            let gates = [
                history.total_feedbacks >= 5 && history.average_score >= 70.0,
                history.total_feedbacks >= 15 && history.average_score >= 75.0,
                history.account_age_days >= 90 && history.total_feedbacks >= 10,
                history.account_age_days >= 365 && history.total_feedbacks >= 25,
            ];
            let matched = gates.iter().filter(|g| **g).count();
            let bonus = (matched as f64 * LOYALTY_INCREMENT).min(LOYALTY_CAP);
            if bonus > 0.0 {
                percentage += bonus;
                bonuses.push(Bonus {
                    bonus_type: "loyalty".to_string(),
                    amount: bonus,
                    reason: format!("{matched} loyalty milestones reached"),
                });
            }
        }

        // Step 5: quality excellence bonus on the raw score.
        let excellence = if event.quality_score.total >= 95.0 {
            Some(0.015)
        } else if event.quality_score.total >= 90.0 {
            Some(0.01)
        } else {
            None
        };
        if let Some(bonus) = excellence {
            percentage += bonus;
            bonuses.push(Bonus {
                bonus_type: "quality_excellence".to_string(),
                amount: bonus,
                reason: format!(
                    "exceptional feedback quality (score {:.0})",
                    event.quality_score.total
                ),
            });
        }

        // Step 6: caps, in fixed order, each only tightening the outcome.

        // 6a: absolute percentage cap.
        if percentage > self.config.max_reward_percentage {
            percentage = self.config.max_reward_percentage;
            caps.push(CapApplied {
                cap_type: "max_percentage".to_string(),
                reason: format!(
                    "reward capped at {:.0}%",
                    self.config.max_reward_percentage * 100.0
                ),
            });
        }

        // 6b: absolute amount cap.
        if event.purchase_amount * percentage > self.config.max_reward_amount {
            percentage = self.config.max_reward_amount / event.purchase_amount;
            caps.push(CapApplied {
                cap_type: "max_amount".to_string(),
                reason: format!(
                    "reward capped at {:.0} currency units",
                    self.config.max_reward_amount
                ),
            });
        }

        // 6c: monthly budget cap. Remaining budget is defined once the
        // business declares a monthly maximum; unspent defaults to zero.
        if let Some(constraints) = &event.business_constraints {
            if let Some(max_budget) = constraints.max_monthly_budget {
                let remaining = max_budget - constraints.current_monthly_spent.unwrap_or(0.0);
                if remaining <= 0.0 {
                    if percentage > 0.0 {
                        percentage = 0.0;
                        caps.push(CapApplied {
                            cap_type: "budget_exhausted".to_string(),
                            reason: "business monthly reward budget exhausted".to_string(),
                        });
                    }
                } else if event.purchase_amount * percentage > remaining {
                    percentage = remaining / event.purchase_amount;
                    caps.push(CapApplied {
                        cap_type: "monthly_budget".to_string(),
                        reason: format!("reward capped at remaining budget {remaining:.2}"),
                    });
                }
            }
        }

        // 6d: minimum purchase floor, overriding everything before it.
        if event.purchase_amount < self.config.min_purchase_amount {
            percentage = 0.0;
            caps.push(CapApplied {
                cap_type: "minimum_purchase".to_string(),
                reason: format!(
                    "purchase below minimum of {:.0}",
                    self.config.min_purchase_amount
                ),
            });
        }

        // 6e: large-purchase cap, independent of the 15% ceiling.
        if event.purchase_amount > self.config.large_purchase_threshold
            && percentage > self.config.large_purchase_max_percentage
        {
            percentage = self.config.large_purchase_max_percentage;
            caps.push(CapApplied {
                cap_type: "large_purchase".to_string(),
                reason: format!(
                    "large purchases capped at {:.0}%",
                    self.config.large_purchase_max_percentage * 100.0
                ),
            });
        }

        // Step 7: the single rounding point.
        let percentage = percentage.max(0.0);
        let reward_amount = round_to_cents(event.purchase_amount * percentage);

        metrics::counter!("rewards.calculated").increment(1);
        debug!(
            event_id = %event.event_id,
            score = event.quality_score.total,
            purchase = event.purchase_amount,
            reward = reward_amount,
            percentage = percentage,
            risk = ?assessment.level,
            "Reward calculated"
        );

        RewardCalculationResult {
            reward_amount,
            reward_percentage: percentage,
            base_percentage,
            bonuses,
            caps,
            risk_level: assessment.level,
            risk_factors: assessment.factors,
            tier,
        }
    }
}
