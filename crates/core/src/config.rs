use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `FEEDBACK_REWARDS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub rewards: RewardConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
}

/// Tunables for the reward calculator's caps. Tier bands and bonus
/// thresholds are fixed product rules and live with the calculator.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    /// Purchases below this amount never earn a reward.
    #[serde(default = "default_min_purchase_amount")]
    pub min_purchase_amount: f64,
    /// Absolute ceiling on the reward percentage, as a fraction.
    #[serde(default = "default_max_reward_percentage")]
    pub max_reward_percentage: f64,
    /// Absolute ceiling on a single reward amount, in currency units.
    #[serde(default = "default_max_reward_amount")]
    pub max_reward_amount: f64,
    /// Purchases above this amount fall under the large-purchase cap.
    #[serde(default = "default_large_purchase_threshold")]
    pub large_purchase_threshold: f64,
    /// Percentage ceiling for large purchases, as a fraction.
    #[serde(default = "default_large_purchase_max_percentage")]
    pub large_purchase_max_percentage: f64,
}

/// Pacing and bounds for one settlement batch run.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Delay between items; the payout rail is rate-limited.
    #[serde(default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total polling budget per payout before it is recorded as a
    /// `poll_timeout` error.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Attempt budget for generating a collision-free reference.
    #[serde(default = "default_reference_max_attempts")]
    pub reference_max_attempts: u32,
}

/// Payout rail presentation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Country code assumed for national-format phone numbers.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    /// Human-readable statement message attached to each payout.
    #[serde(default = "default_payout_message")]
    pub payout_message: String,
}

fn default_min_purchase_amount() -> f64 {
    50.0
}
fn default_max_reward_percentage() -> f64 {
    0.15
}
fn default_max_reward_amount() -> f64 {
    200.0
}
fn default_large_purchase_threshold() -> f64 {
    5000.0
}
fn default_large_purchase_max_percentage() -> f64 {
    0.05
}
fn default_inter_item_delay_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_poll_timeout_ms() -> u64 {
    60_000
}
fn default_reference_max_attempts() -> u32 {
    5
}
fn default_currency() -> String {
    "KES".to_string()
}
fn default_country_code() -> String {
    "254".to_string()
}
fn default_payout_message() -> String {
    "Cashback for your verified feedback".to_string()
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            min_purchase_amount: default_min_purchase_amount(),
            max_reward_percentage: default_max_reward_percentage(),
            max_reward_amount: default_max_reward_amount(),
            large_purchase_threshold: default_large_purchase_threshold(),
            large_purchase_max_percentage: default_large_purchase_max_percentage(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            inter_item_delay_ms: default_inter_item_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            reference_max_attempts: default_reference_max_attempts(),
        }
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            default_country_code: default_country_code(),
            payout_message: default_payout_message(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rewards: RewardConfig::default(),
            settlement: SettlementConfig::default(),
            payout: PayoutConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("FEEDBACK_REWARDS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
