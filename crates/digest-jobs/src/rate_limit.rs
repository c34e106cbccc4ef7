//! Per-user hourly request quota.
//!
//! Counts live in a single ledger stored as the `AI_RATE_LIMIT` workspace
//! setting, keyed `user_{user_id}_{hour_unix_ts}`. Every mutation is a
//! read-modify-write guarded by the setting's version, retried on conflict,
//! so concurrent requests from one user cannot overrun the quota.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use digest_core::{defaults, Clock, Error, RateLimitLedger, Result, SettingStore};

/// Quota slot taken by [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub user_id: Uuid,
    /// Ledger key of the hour bucket that was incremented.
    pub bucket: String,
}

/// Ledger key for `user_id` in the hour containing `at`.
pub fn bucket_key(user_id: Uuid, at: DateTime<Utc>) -> String {
    format!("user_{}_{}", user_id, hour_start(at))
}

fn hour_start(at: DateTime<Utc>) -> i64 {
    let ts = at.timestamp();
    ts - ts.rem_euclid(3600)
}

/// Split a ledger key into user and hour timestamp.
pub fn parse_bucket_key(key: &str) -> Option<(Uuid, i64)> {
    let rest = key.strip_prefix("user_")?;
    let (user, ts) = rest.rsplit_once('_')?;
    Some((user.parse().ok()?, ts.parse().ok()?))
}

/// Drop buckets older than the retention window and keys that do not
/// parse. Returns the number of entries removed.
fn prune(ledger: &mut RateLimitLedger, now: DateTime<Utc>) -> usize {
    let cutoff = hour_start(now - Duration::hours(defaults::LEDGER_RETENTION_HOURS));
    let before = ledger.counts.len();
    ledger
        .counts
        .retain(|key, _| matches!(parse_bucket_key(key), Some((_, ts)) if ts >= cutoff));
    before - ledger.counts.len()
}

fn decode_ledger(value: JsonValue) -> RateLimitLedger {
    let decoded = match value {
        JsonValue::Null => return RateLimitLedger::default(),
        JsonValue::String(raw) if raw.trim().is_empty() => return RateLimitLedger::default(),
        JsonValue::String(raw) => serde_json::from_str(&raw),
        other => serde_json::from_value(other),
    };
    decoded.unwrap_or_else(|e| {
        warn!(
            subsystem = "jobs",
            component = "rate_limit",
            error = %e,
            "Failed to decode rate limit ledger, resetting"
        );
        RateLimitLedger::default()
    })
}

/// Hourly quota gate backed by the settings store.
#[derive(Clone)]
pub struct RateLimiter {
    settings: Arc<dyn SettingStore>,
    clock: Arc<dyn Clock>,
    max_per_hour: u32,
}

impl RateLimiter {
    pub fn new(settings: Arc<dyn SettingStore>, clock: Arc<dyn Clock>, max_per_hour: u32) -> Self {
        Self {
            settings,
            clock,
            max_per_hour,
        }
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    fn exceeded(&self) -> Error {
        Error::ResourceExhausted(format!(
            "rate limit exceeded: maximum {} requests per hour allowed",
            self.max_per_hour
        ))
    }

    async fn load(&self) -> Result<(RateLimitLedger, Option<i64>)> {
        match self
            .settings
            .get_workspace_setting(defaults::RATE_LIMIT_KEY)
            .await?
        {
            Some(stored) => Ok((decode_ledger(stored.value), Some(stored.version))),
            None => Ok((RateLimitLedger::default(), None)),
        }
    }

    /// Requests counted for `user_id` in the current hour.
    pub async fn current_count(&self, user_id: Uuid) -> Result<u32> {
        let (ledger, _) = self.load().await?;
        let key = bucket_key(user_id, self.clock.now());
        Ok(ledger.counts.get(&key).copied().unwrap_or(0))
    }

    /// Fail with `ResourceExhausted` when the user is at quota. Never writes.
    pub async fn check_rate_limit(&self, user_id: Uuid) -> Result<()> {
        if self.current_count(user_id).await? >= self.max_per_hour {
            return Err(self.exceeded());
        }
        Ok(())
    }

    /// Count one request for `user_id` in the current hour, regardless of
    /// quota.
    pub async fn update_rate_limit(&self, user_id: Uuid) -> Result<()> {
        let count = self
            .mutate("update", |ledger, now| {
                let slot = ledger.counts.entry(bucket_key(user_id, now)).or_insert(0);
                *slot += 1;
                Ok(Some(*slot))
            })
            .await?;
        debug!(
            subsystem = "jobs",
            component = "rate_limit",
            user_id = %user_id,
            count,
            "Rate limit counter updated"
        );
        Ok(())
    }

    /// Check and increment in one versioned write.
    ///
    /// Fails with `ResourceExhausted` when the current bucket is already at
    /// quota; in that case nothing is written.
    pub async fn try_acquire(&self, user_id: Uuid) -> Result<Reservation> {
        let max = self.max_per_hour;
        let reserved = self
            .mutate("acquire", |ledger, now| {
                let key = bucket_key(user_id, now);
                let slot = ledger.counts.entry(key.clone()).or_insert(0);
                if *slot >= max {
                    return Err(Error::ResourceExhausted(format!(
                        "rate limit exceeded: maximum {} requests per hour allowed",
                        max
                    )));
                }
                *slot += 1;
                Ok(Some((key, *slot)))
            })
            .await?;

        match reserved {
            Some((bucket, count)) => {
                debug!(
                    subsystem = "jobs",
                    component = "rate_limit",
                    user_id = %user_id,
                    count,
                    max,
                    "Rate limit slot reserved"
                );
                Ok(Reservation { user_id, bucket })
            }
            None => Err(self.exceeded()),
        }
    }

    /// Give back a slot taken by [`try_acquire`](Self::try_acquire).
    ///
    /// Returns `false` when the bucket was already empty or pruned.
    pub async fn release(&self, reservation: &Reservation) -> Result<bool> {
        let released = self
            .mutate("release", |ledger, _| {
                if let Some(slot) = ledger.counts.get_mut(&reservation.bucket) {
                    *slot = slot.saturating_sub(1);
                    if *slot == 0 {
                        ledger.counts.remove(&reservation.bucket);
                    }
                    return Ok(Some(()));
                }
                Ok(None)
            })
            .await?
            .is_some();

        if released {
            info!(
                subsystem = "jobs",
                component = "rate_limit",
                user_id = %reservation.user_id,
                "Rate limit slot released"
            );
        } else {
            debug!(
                subsystem = "jobs",
                component = "rate_limit",
                user_id = %reservation.user_id,
                bucket = %reservation.bucket,
                "No rate limit slot to release"
            );
        }
        Ok(released)
    }

    /// Versioned read-modify-write of the ledger.
    ///
    /// `apply` returns `Ok(None)` when there is nothing to write. The ledger
    /// is pruned on every write.
    async fn mutate<T, F>(&self, op: &'static str, mut apply: F) -> Result<Option<T>>
    where
        F: FnMut(&mut RateLimitLedger, DateTime<Utc>) -> Result<Option<T>>,
    {
        for attempt in 1..=defaults::LEDGER_CAS_ATTEMPTS {
            let (mut ledger, version) = self.load().await?;
            let now = self.clock.now();

            let Some(out) = apply(&mut ledger, now)? else {
                return Ok(None);
            };
            let pruned = prune(&mut ledger, now);

            let value = serde_json::to_value(&ledger)?;
            if self
                .settings
                .compare_and_swap_workspace_setting(defaults::RATE_LIMIT_KEY, version, &value)
                .await?
            {
                if pruned > 0 {
                    debug!(
                        subsystem = "jobs",
                        component = "rate_limit",
                        pruned,
                        "Pruned expired rate limit buckets"
                    );
                }
                return Ok(Some(out));
            }

            debug!(
                subsystem = "jobs",
                component = "rate_limit",
                op,
                attempt,
                "Rate limit ledger changed concurrently, retrying"
            );
            tokio::task::yield_now().await;
        }

        Err(Error::Internal(format!(
            "rate limit ledger {} failed after {} conflicting writes",
            op,
            defaults::LEDGER_CAS_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use digest_core::{ErrorCode, ManualClock};
    use digest_db::MemoryStore;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 15, 0).unwrap()
    }

    fn limiter(store: &MemoryStore, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(Arc::new(store.clone()), clock, 5)
    }

    #[test]
    fn test_bucket_key_truncates_to_hour() {
        let user = Uuid::nil();
        let key = bucket_key(user, start());
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap().timestamp();
        assert_eq!(key, format!("user_{}_{}", user, expected));
        assert_eq!(parse_bucket_key(&key), Some((user, expected)));
        assert_eq!(parse_bucket_key("user_12_abc"), None);
        assert_eq!(parse_bucket_key("garbage"), None);
    }

    #[test]
    fn test_prune_drops_old_and_unparseable() {
        let user = Uuid::nil();
        let now = start();
        let mut ledger = RateLimitLedger::default();
        ledger.counts.insert(bucket_key(user, now), 1);
        ledger
            .counts
            .insert(bucket_key(user, now - Duration::hours(24)), 2);
        ledger
            .counts
            .insert(bucket_key(user, now - Duration::hours(25)), 3);
        ledger.counts.insert("user_1_2".into(), 4);

        assert_eq!(prune(&mut ledger, now), 2);
        assert_eq!(ledger.counts.len(), 2);
    }

    #[tokio::test]
    async fn test_check_then_update() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let rl = limiter(&store, clock);
        let user = Uuid::now_v7();

        for _ in 0..5 {
            rl.check_rate_limit(user).await.unwrap();
            rl.update_rate_limit(user).await.unwrap();
        }
        let err = rl.check_rate_limit(user).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);
        assert!(err.to_string().contains("maximum 5 requests per hour"));

        // Another user is unaffected.
        rl.check_rate_limit(Uuid::now_v7()).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_hour_resets_quota() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let rl = limiter(&store, clock.clone());
        let user = Uuid::now_v7();

        for _ in 0..5 {
            rl.try_acquire(user).await.unwrap();
        }
        assert!(rl.try_acquire(user).await.is_err());

        clock.advance(Duration::hours(1));
        rl.try_acquire(user).await.unwrap();
        assert_eq!(rl.current_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_returns_slot() {
        let store = MemoryStore::new();
        let rl = limiter(&store, Arc::new(ManualClock::new(start())));
        let user = Uuid::now_v7();

        let r = rl.try_acquire(user).await.unwrap();
        assert_eq!(rl.current_count(user).await.unwrap(), 1);
        assert!(rl.release(&r).await.unwrap());
        assert_eq!(rl.current_count(user).await.unwrap(), 0);
        // A second release finds nothing to give back.
        assert!(!rl.release(&r).await.unwrap());
        assert_eq!(rl.current_count(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_quota() {
        let store = MemoryStore::new();
        let rl = limiter(&store, Arc::new(ManualClock::new(start())));
        let user = Uuid::now_v7();

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..5 {
            let rl = rl.clone();
            set.spawn(async move { rl.try_acquire(user).await });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap().unwrap();
        }
        assert_eq!(rl.current_count(user).await.unwrap(), 5);
        assert!(rl.try_acquire(user).await.is_err());
    }

    #[tokio::test]
    async fn test_write_prunes_expired_buckets() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start()));
        let rl = limiter(&store, clock.clone());
        let user = Uuid::now_v7();

        rl.update_rate_limit(user).await.unwrap();
        clock.advance(Duration::hours(30));
        rl.update_rate_limit(user).await.unwrap();

        let stored = store
            .get_workspace_setting(defaults::RATE_LIMIT_KEY)
            .await
            .unwrap()
            .unwrap();
        let ledger: RateLimitLedger = serde_json::from_value(stored.value).unwrap();
        assert_eq!(ledger.counts.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_treated_as_empty() {
        let store = MemoryStore::new();
        store
            .put_workspace_setting(defaults::RATE_LIMIT_KEY, &json!("{not json"))
            .await
            .unwrap();
        let rl = limiter(&store, Arc::new(ManualClock::new(start())));
        let user = Uuid::now_v7();
        rl.check_rate_limit(user).await.unwrap();
        rl.try_acquire(user).await.unwrap();
        assert_eq!(rl.current_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_string_encoded_ledger_is_read() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        let key = bucket_key(user, start());
        let raw = json!({"counts": {key: 5}}).to_string();
        store
            .put_workspace_setting(defaults::RATE_LIMIT_KEY, &JsonValue::String(raw))
            .await
            .unwrap();
        let rl = limiter(&store, Arc::new(ManualClock::new(start())));
        assert!(rl.check_rate_limit(user).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let store = MemoryStore::new();
        store.fail_workspace_writes(defaults::RATE_LIMIT_KEY).await;
        let rl = limiter(&store, Arc::new(ManualClock::new(start())));
        assert!(rl.try_acquire(Uuid::now_v7()).await.is_err());
    }
}
