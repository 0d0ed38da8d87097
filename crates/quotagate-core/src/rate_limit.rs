use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::entitlement::{ActionKind, ActivityLog};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOutcome {
    Allowed,
    /// Denied; the caller may retry after roughly this many seconds.
    Limited { retry_after_secs: u64 },
}

impl RateOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateOutcome::Allowed)
    }
}

/// Outcome of [`RateLimiter::admit_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionAdmission {
    /// Counted and recorded at `at`.
    Recorded { at: DateTime<Utc> },
    /// Admitted without a record because the activity log failed.
    Unrecorded,
    Limited { retry_after_secs: u64 },
}

impl ActionAdmission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, ActionAdmission::Limited { .. })
    }
}

/// Trailing-window frequency checks, independent of quota.
///
/// Every call recomputes the window from the activity log, so bursts that
/// straddle a fixed bucket boundary are still caught. Storage errors fail open.
pub struct RateLimiter {
    config: RateLimitConfig,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        activity: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            activity,
            clock,
        }
    }

    /// Admit one `action` for `actor_id` unless `max_actions` are already in
    /// the trailing window. Admission records the action in the same atomic
    /// step, so a concurrent burst cannot overshoot the limit.
    ///
    /// A disabled limiter still records (with no cap) so the log stays
    /// complete.
    pub async fn admit_action(&self, actor_id: &str, action: ActionKind) -> ActionAdmission {
        let now = self.clock.now();
        let since = now - to_chrono(self.config.window);
        let max_actions = if self.config.disabled {
            u64::MAX
        } else {
            self.config.max_actions
        };
        match self
            .activity
            .record_if_under(actor_id, action, since, max_actions, now)
            .await
        {
            Ok(true) => ActionAdmission::Recorded { at: now },
            Ok(false) => {
                info!(actor_id, %action, max_actions, "Action rate limit reached");
                ActionAdmission::Limited {
                    retry_after_secs: self.config.window.as_secs().max(1),
                }
            }
            Err(e) => {
                warn!(actor_id, %action, error = %e, "Action rate check failed, allowing");
                ActionAdmission::Unrecorded
            }
        }
    }

    /// Give back an admission whose action did not go ahead (quota denial,
    /// contention, commit failure). Failures are logged only.
    pub async fn release_action(&self, actor_id: &str, action: ActionKind, at: DateTime<Utc>) {
        if let Err(e) = self.activity.release_action(actor_id, action, at).await {
            warn!(actor_id, %action, error = %e, "Failed to release action admission");
        }
    }

    /// Deny when `resource_id` was modified less than `min_update_interval` ago.
    /// Unknown resources pass; the handler reports those on its own.
    pub async fn check_resource_update(&self, resource_id: &str) -> RateOutcome {
        if self.config.disabled {
            return RateOutcome::Allowed;
        }
        let min_interval = to_chrono(self.config.min_update_interval);
        match self.activity.resource_last_modified(resource_id).await {
            Ok(Some(modified_at)) => {
                let age = self.clock.now() - modified_at;
                if age < min_interval {
                    let wait = (min_interval - age).num_milliseconds().max(0) as u64;
                    info!(resource_id, age_ms = age.num_milliseconds(), "Resource update too frequent");
                    RateOutcome::Limited {
                        retry_after_secs: wait.div_ceil(1000).max(1),
                    }
                } else {
                    RateOutcome::Allowed
                }
            }
            Ok(None) => RateOutcome::Allowed,
            Err(e) => {
                warn!(resource_id, error = %e, "Resource update check failed, allowing");
                RateOutcome::Allowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_800_000_000, 0).expect("valid timestamp")
    }

    fn limiter(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default(), store, clock)
    }

    #[tokio::test]
    async fn sixth_action_in_window_is_limited_until_window_slides() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = limiter(store.clone(), clock.clone());

        for _ in 0..5 {
            assert_eq!(
                limiter.admit_action("user_1", ActionKind::CreatePlan).await,
                ActionAdmission::Recorded { at: clock.now() }
            );
            clock.advance(Duration::seconds(5));
        }

        let outcome = limiter.admit_action("user_1", ActionKind::CreatePlan).await;
        assert_eq!(
            outcome,
            ActionAdmission::Limited {
                retry_after_secs: 60
            }
        );
        assert_eq!(store.activity_count("user_1").await, 5);

        // Other actors and other action kinds are unaffected.
        assert!(limiter
            .admit_action("user_2", ActionKind::CreatePlan)
            .await
            .is_admitted());
        assert!(limiter
            .admit_action("user_1", ActionKind::TravelInfo)
            .await
            .is_admitted());

        // The first action was at t=0; at t=60 it has left the window.
        clock.set(start() + Duration::seconds(60));
        assert!(limiter
            .admit_action("user_1", ActionKind::CreatePlan)
            .await
            .is_admitted());
    }

    #[tokio::test]
    async fn concurrent_burst_admits_exactly_the_limit() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = Arc::new(limiter(store.clone(), clock));
        let barrier = Arc::new(tokio::sync::Barrier::new(12));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.admit_action("user_1", ActionKind::CreatePlan).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.expect("join").is_admitted() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(store.activity_count("user_1").await, 5);
    }

    #[tokio::test]
    async fn released_admission_frees_its_slot() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = limiter(store.clone(), clock.clone());

        for _ in 0..5 {
            limiter.admit_action("user_1", ActionKind::CreatePlan).await;
        }
        limiter
            .release_action("user_1", ActionKind::CreatePlan, clock.now())
            .await;
        assert_eq!(store.activity_count("user_1").await, 4);
        assert!(limiter
            .admit_action("user_1", ActionKind::CreatePlan)
            .await
            .is_admitted());
    }

    #[tokio::test]
    async fn recent_resource_update_is_limited() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = limiter(store.clone(), clock.clone());

        assert!(limiter.check_resource_update("plan_1").await.is_allowed());

        store.touch_resource("plan_1", clock.now()).await;
        clock.advance(Duration::milliseconds(1500));
        assert_eq!(
            limiter.check_resource_update("plan_1").await,
            RateOutcome::Limited {
                retry_after_secs: 2
            }
        );

        clock.advance(Duration::milliseconds(1500));
        assert!(limiter.check_resource_update("plan_1").await.is_allowed());
    }

    #[tokio::test]
    async fn disabled_limiter_admits_and_still_records() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let config = RateLimitConfig {
            disabled: true,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config, store.clone(), clock.clone());
        store.touch_resource("plan_1", clock.now()).await;
        for _ in 0..10 {
            assert!(limiter
                .admit_action("user_1", ActionKind::CreatePlan)
                .await
                .is_admitted());
        }
        assert_eq!(store.activity_count("user_1").await, 10);
        assert!(limiter.check_resource_update("plan_1").await.is_allowed());
    }

    struct BrokenLog;

    #[async_trait]
    impl ActivityLog for BrokenLog {
        async fn record_if_under(
            &self,
            _actor_id: &str,
            _action: ActionKind,
            _since: DateTime<Utc>,
            _max_actions: u64,
            _at: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("timeout")
        }

        async fn release_action(
            &self,
            _actor_id: &str,
            _action: ActionKind,
            _at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            anyhow::bail!("timeout")
        }

        async fn resource_last_modified(
            &self,
            _resource_id: &str,
        ) -> anyhow::Result<Option<DateTime<Utc>>> {
            anyhow::bail!("timeout")
        }
    }

    #[tokio::test]
    async fn storage_errors_fail_open() {
        let limiter = RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(BrokenLog),
            Arc::new(ManualClock::new(start())),
        );
        assert_eq!(
            limiter.admit_action("user_1", ActionKind::CreatePlan).await,
            ActionAdmission::Unrecorded
        );
        assert!(limiter.check_resource_update("plan_1").await.is_allowed());
    }
}
