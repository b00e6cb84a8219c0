//! Collision-resistant settlement references. A reference couples a
//! millisecond timestamp with high-entropy random alphanumerics and is
//! claimed atomically against a store before use, so concurrent batches
//! can never hand the rail a duplicate.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

use feedback_core::error::{RewardError, RewardResult};

use crate::retry::RetryPolicy;

/// Maximum reference length accepted by the payout rail.
const MAX_REFERENCE_LEN: usize = 40;
const ENTROPY_LEN: usize = 10;

/// Persistence seam for claimed references.
pub trait ReferenceStore: Send + Sync {
    /// Atomically claim a reference. Returns false if it already exists.
    fn try_claim(&self, reference: &str) -> bool;
}

/// In-memory reference store backed by `DashMap`.
#[derive(Default)]
pub struct InMemoryReferenceStore {
    claimed: DashMap<String, ()>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

impl ReferenceStore for InMemoryReferenceStore {
    fn try_claim(&self, reference: &str) -> bool {
        self.claimed.insert(reference.to_string(), ()).is_none()
    }
}

/// Generates unique references within a namespace, retrying with backoff
/// on collision up to a fixed attempt budget.
pub struct ReferenceGenerator<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    max_attempts: u32,
}

impl<S: ReferenceStore> ReferenceGenerator<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            store,
            policy,
            max_attempts,
        }
    }

    /// Generate and claim the next reference for `scope` (e.g. a batch id
    /// prefix). Exhausting the attempt budget is fatal for the single item
    /// being settled, never for the whole batch.
    pub async fn next(&self, scope: &str) -> RewardResult<String> {
        for attempt in 0..self.max_attempts {
            let candidate = Self::candidate(scope);
            if self.store.try_claim(&candidate) {
                return Ok(candidate);
            }
            warn!(
                scope = %scope,
                attempt = attempt + 1,
                "Reference collision, retrying"
            );
            metrics::counter!("settlement.reference_collisions").increment(1);
            tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
        }
        Err(RewardError::ReferenceExhausted {
            attempts: self.max_attempts,
        })
    }

    fn candidate(scope: &str) -> String {
        let entropy: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ENTROPY_LEN)
            .map(char::from)
            .collect();
        let mut reference = format!("{scope}-{}-{entropy}", Utc::now().timestamp_millis());
        reference.truncate(MAX_REFERENCE_LEN);
        reference
    }
}
