//! Circuit breakers keyed by (tenant, tool).
//!
//! CLOSED counts consecutive failures and trips to OPEN at the threshold.
//! OPEN rejects until the cool-down elapses, then becomes HALF_OPEN and
//! admits exactly one trial. A successful trial closes the breaker, a failed
//! one re-opens it. Every transition happens under the map lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::TenantId;
use crate::obs;

type BreakerKey = (TenantId, String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub trip_threshold: u32,
    /// Time spent OPEN before a trial is admitted (milliseconds).
    pub cool_down_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 5,
            cool_down_ms: 30_000,
        }
    }
}

impl BreakerConfig {
    fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }
}

/// Read-only snapshot of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BreakerState {
    Closed { failures: u32 },
    Open { failures: u32, retry_in_ms: u64 },
    HalfOpen { failures: u32, trial_in_flight: bool },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    phase: Phase,
}

impl Entry {
    fn closed() -> Self {
        Self {
            failures: 0,
            phase: Phase::Closed,
        }
    }
}

/// The breaker refused the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejected {
    pub failures: u32,
}

/// Proof that the breaker admitted one attempt.
///
/// Settle with [`succeed`](Self::succeed) or [`fail`](Self::fail). A
/// half-open trial permit that is dropped unsettled (e.g. the caller's
/// future was cancelled) frees the trial slot without changing the state.
#[derive(Debug)]
pub struct BreakerPermit {
    entries: Arc<Mutex<HashMap<BreakerKey, Entry>>>,
    config: BreakerConfig,
    key: BreakerKey,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this permit is the single HALF_OPEN trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record success.
    ///
    /// A CLOSED breaker resets its count. An OPEN or HALF_OPEN breaker only
    /// closes when this permit is the half-open trial; a late success from an
    /// attempt admitted before the breaker tripped leaves it untouched.
    pub fn succeed(mut self) {
        self.settled = true;
        let mut entries = self.entries.lock();
        let Some(phase) = entries.get(&self.key).map(|e| e.phase) else {
            return;
        };
        match phase {
            Phase::Closed => {
                entries.remove(&self.key);
            }
            Phase::Open { .. } | Phase::HalfOpen { .. } if self.trial => {
                entries.remove(&self.key);
                obs::emit_breaker_closed(&self.key.0, &self.key.1);
            }
            Phase::Open { .. } | Phase::HalfOpen { .. } => {}
        }
    }

    /// Record failure and return the consecutive failure count.
    pub fn fail(mut self) -> u32 {
        self.settled = true;
        let mut entries = self.entries.lock();
        let entry = entries.entry(self.key.clone()).or_insert_with(Entry::closed);
        entry.failures = entry.failures.saturating_add(1);

        let trips = match entry.phase {
            Phase::HalfOpen { .. } => self.trial,
            Phase::Closed => entry.failures >= self.config.trip_threshold,
            Phase::Open { .. } => false,
        };
        if trips {
            entry.phase = Phase::Open {
                opened_at: Instant::now(),
            };
            obs::emit_breaker_opened(&self.key.0, &self.key.1, entry.failures);
        }
        entry.failures
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            if let Phase::HalfOpen { trial_in_flight } = &mut entry.phase {
                *trial_in_flight = false;
            }
        }
    }
}

/// All breakers of one invoker.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    entries: Arc<Mutex<HashMap<BreakerKey, Entry>>>,
}

impl CircuitBreakerRegistry {
    /// Breakers start CLOSED and are created on first failure.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: Arc::default(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask to run one attempt against (tenant, tool).
    pub fn acquire(
        &self,
        tenant: &TenantId,
        tool: &str,
    ) -> Result<BreakerPermit, BreakerRejected> {
        let key = (tenant.clone(), tool.to_string());
        let mut entries = self.entries.lock();
        let mut trial = false;

        if let Some(entry) = entries.get_mut(&key) {
            match entry.phase {
                Phase::Closed => {}
                Phase::Open { opened_at } => {
                    if opened_at.elapsed() < self.config.cool_down() {
                        return Err(BreakerRejected {
                            failures: entry.failures,
                        });
                    }
                    entry.phase = Phase::HalfOpen {
                        trial_in_flight: true,
                    };
                    trial = true;
                    obs::emit_breaker_half_open(tenant, tool);
                }
                Phase::HalfOpen { trial_in_flight } => {
                    if trial_in_flight {
                        return Err(BreakerRejected {
                            failures: entry.failures,
                        });
                    }
                    entry.phase = Phase::HalfOpen {
                        trial_in_flight: true,
                    };
                    trial = true;
                }
            }
        }
        drop(entries);

        Ok(BreakerPermit {
            entries: Arc::clone(&self.entries),
            config: self.config.clone(),
            key,
            trial,
            settled: false,
        })
    }

    /// Whether `acquire` would currently reject. Does not change state.
    pub fn is_open(&self, tenant: &TenantId, tool: &str) -> bool {
        match self.state(tenant, tool) {
            BreakerState::Closed { .. } => false,
            BreakerState::Open { retry_in_ms, .. } => retry_in_ms > 0,
            BreakerState::HalfOpen {
                trial_in_flight, ..
            } => trial_in_flight,
        }
    }

    /// Snapshot of the breaker for (tenant, tool). Unknown keys are CLOSED.
    pub fn state(&self, tenant: &TenantId, tool: &str) -> BreakerState {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(&(tenant.clone(), tool.to_string())) else {
            return BreakerState::Closed { failures: 0 };
        };
        match entry.phase {
            Phase::Closed => BreakerState::Closed {
                failures: entry.failures,
            },
            Phase::Open { opened_at } => BreakerState::Open {
                failures: entry.failures,
                retry_in_ms: self
                    .config
                    .cool_down()
                    .saturating_sub(opened_at.elapsed())
                    .as_millis() as u64,
            },
            Phase::HalfOpen { trial_in_flight } => BreakerState::HalfOpen {
                failures: entry.failures,
                trial_in_flight,
            },
        }
    }

    /// Forget the breaker for (tenant, tool).
    pub fn reset(&self, tenant: &TenantId, tool: &str) {
        self.entries.lock().remove(&(tenant.clone(), tool.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers(threshold: u32) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(BreakerConfig {
            trip_threshold: threshold,
            cool_down_ms: 1_000,
        })
    }

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    fn fail_n(reg: &CircuitBreakerRegistry, n: u32) {
        for _ in 0..n {
            reg.acquire(&tenant(), "refund").unwrap().fail();
        }
    }

    #[test]
    fn test_starts_closed() {
        let reg = breakers(3);
        assert_eq!(reg.state(&tenant(), "refund"), BreakerState::Closed { failures: 0 });
        assert!(!reg.is_open(&tenant(), "refund"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_at_threshold() {
        let reg = breakers(3);
        fail_n(&reg, 2);
        assert!(!reg.is_open(&tenant(), "refund"));
        fail_n(&reg, 1);
        assert!(reg.is_open(&tenant(), "refund"));
        assert_eq!(reg.acquire(&tenant(), "refund").unwrap_err().failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_count() {
        let reg = breakers(3);
        fail_n(&reg, 2);
        reg.acquire(&tenant(), "refund").unwrap().succeed();
        assert_eq!(reg.state(&tenant(), "refund"), BreakerState::Closed { failures: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let reg = breakers(1);
        fail_n(&reg, 1);
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let trial = reg.acquire(&tenant(), "refund").unwrap();
        assert!(trial.is_trial());
        assert!(reg.acquire(&tenant(), "refund").is_err());

        trial.succeed();
        assert_eq!(reg.state(&tenant(), "refund"), BreakerState::Closed { failures: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let reg = breakers(1);
        fail_n(&reg, 1);
        tokio::time::advance(Duration::from_millis(1_500)).await;

        reg.acquire(&tenant(), "refund").unwrap().fail();
        assert!(matches!(
            reg.state(&tenant(), "refund"),
            BreakerState::Open { failures: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_slot() {
        let reg = breakers(1);
        fail_n(&reg, 1);
        tokio::time::advance(Duration::from_millis(1_001)).await;

        drop(reg.acquire(&tenant(), "refund").unwrap());
        assert_eq!(
            reg.state(&tenant(), "refund"),
            BreakerState::HalfOpen {
                failures: 1,
                trial_in_flight: false
            }
        );
        assert!(reg.acquire(&tenant(), "refund").unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_open_breaker() {
        let reg = breakers(3);
        let slow = reg.acquire(&tenant(), "refund").unwrap();
        fail_n(&reg, 3);
        assert!(reg.is_open(&tenant(), "refund"));

        slow.succeed();
        assert!(matches!(
            reg.state(&tenant(), "refund"),
            BreakerState::Open { failures: 3, .. }
        ));
        assert_eq!(reg.acquire(&tenant(), "refund").unwrap_err().failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_settle_half_open_trial() {
        let reg = breakers(1);
        let slow = reg.acquire(&tenant(), "refund").unwrap();
        fail_n(&reg, 1);
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let trial = reg.acquire(&tenant(), "refund").unwrap();
        assert!(trial.is_trial());
        slow.succeed();
        assert_eq!(
            reg.state(&tenant(), "refund"),
            BreakerState::HalfOpen {
                failures: 1,
                trial_in_flight: true
            }
        );

        trial.succeed();
        assert_eq!(reg.state(&tenant(), "refund"), BreakerState::Closed { failures: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_isolated_per_tenant() {
        let reg = breakers(1);
        fail_n(&reg, 1);
        assert!(reg.is_open(&tenant(), "refund"));
        assert!(!reg.is_open(&TenantId::new("globex"), "refund"));
        assert!(!reg.is_open(&tenant(), "notify"));
    }
}
