use chrono::{DateTime, Duration, Utc};

use super::{metrics, ServiceError};
use crate::config::ThrottleConfig;
use crate::models::FailedAuthorization;
use crate::pipeline::{DurableWrite, RequestScope};
use crate::store::{Direction, Query, Tx};

/// Brute-force back-off keyed on `(client address, target user)`.
///
/// Failures are never cleared on success; they age out after the configured
/// lifetime.
#[derive(Clone)]
pub struct Throttler {
    config: ThrottleConfig,
}

impl Throttler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    /// Seconds an attempt must wait after the latest of `count` recent failures.
    pub fn minimum_wait(&self, count: i64) -> i64 {
        let excess = count - self.config.max_failures;
        if excess <= 0 {
            return 0;
        }
        excess
            .saturating_mul(self.config.min_wait_seconds)
            .clamp(0, self.config.max_wait_seconds)
    }

    fn recent_failures(&self, ip: &str, user_id: Option<i64>, now: DateTime<Utc>) -> Query {
        let since = now - Duration::seconds(self.config.lifetime_seconds);
        Query::new()
            .eq("ip", ip)
            .eq("user_id", user_id)
            .gt("attempt_time", since)
    }

    pub async fn check(&self, tx: &mut Tx, ip: &str, user_id: Option<i64>) -> Result<(), ServiceError> {
        self.check_at(tx, ip, user_id, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        tx: &mut Tx,
        ip: &str,
        user_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let query = self.recent_failures(ip, user_id, now);
        let count = tx.count::<FailedAuthorization>(query.clone()).await?;

        let expected = self.minimum_wait(count);
        if expected == 0 {
            return Ok(());
        }

        let latest = tx
            .find_one::<FailedAuthorization>(query.order_by("attempt_time", Direction::Desc))
            .await?;
        let Some(latest) = latest else {
            return Ok(());
        };

        if now - latest.attempt_time < Duration::seconds(expected) {
            tracing::warn!(ip = %ip, user_id = ?user_id, failures = count, retry_after = expected, "Attempt throttled");
            metrics::record_throttled();
            return Err(ServiceError::Throttled {
                retry_after: expected.unsigned_abs(),
            });
        }
        Ok(())
    }

    /// Queues the failure on the request. It is stored after the request
    /// transaction ends, so it survives a rollback.
    pub fn record_failure(&self, scope: &mut RequestScope, ip: &str, user_id: Option<i64>) {
        scope.defer(DurableWrite::Failure(failure_at(ip, user_id, Utc::now())));
        tracing::info!(ip = %ip, user_id = ?user_id, "Failed authorization recorded");
    }
}

fn failure_at(ip: &str, user_id: Option<i64>, now: DateTime<Utc>) -> FailedAuthorization {
    FailedAuthorization {
        id: 0,
        attempt_time: now,
        ip: ip.to_string(),
        user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FacilityConfig;
    use crate::models::TABLES;
    use crate::reconciler::{FakeHost, Reconciler};
    use crate::store::{MemoryStore, Store};
    use std::sync::Arc;

    fn throttler() -> (Throttler, MemoryStore) {
        let throttler = Throttler::new(FacilityConfig::default().throttle);
        (throttler, MemoryStore::new(TABLES))
    }

    async fn fail(tx: &mut Tx, ip: &str, user_id: Option<i64>, at: DateTime<Utc>) {
        DurableWrite::Failure(failure_at(ip, user_id, at))
            .apply(tx)
            .await
            .unwrap();
    }

    #[test]
    fn test_minimum_wait_is_monotone_and_bounded() {
        let (throttler, _) = throttler();
        assert_eq!(throttler.minimum_wait(0), 0);
        assert_eq!(throttler.minimum_wait(50), 0);
        assert_eq!(throttler.minimum_wait(51), 1);
        assert_eq!(throttler.minimum_wait(55), 5);
        assert_eq!(throttler.minimum_wait(500), 10);

        let mut previous = 0;
        for count in 0..200 {
            let wait = throttler.minimum_wait(count);
            assert!(wait >= previous);
            assert!(wait <= 10);
            previous = wait;
        }
    }

    #[tokio::test]
    async fn test_failures_throttle() {
        let (throttler, store) = throttler();
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();

        for i in 0..51 {
            fail(&mut tx, "10.0.0.9", None, now - Duration::milliseconds(51 - i)).await;
        }

        let err = throttler
            .check_at(&mut tx, "10.0.0.9", None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Throttled { retry_after: 1 }));

        // other address, same user: untouched
        assert!(throttler.check_at(&mut tx, "10.0.0.10", None, now).await.is_ok());
        // after the wait elapsed
        assert!(throttler
            .check_at(&mut tx, "10.0.0.9", None, now + Duration::seconds(2))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failures_age_out() {
        let (throttler, store) = throttler();
        let long_ago = Utc::now() - Duration::seconds(3600);
        let mut tx = store.begin().await.unwrap();
        for _ in 0..60 {
            fail(&mut tx, "10.0.0.1", None, long_ago).await;
        }

        assert!(throttler.check(&mut tx, "10.0.0.1", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_is_queued_on_the_request() {
        let (throttler, store) = throttler();
        let host = Arc::new(FakeHost::new());
        let reconciler = Arc::new(Reconciler::new(
            FacilityConfig::default().posix,
            host.clone(),
            host,
        ));
        let tx = store.begin().await.unwrap();
        let mut scope = RequestScope::new(tx, reconciler.open("throttle-test").unwrap());

        throttler.record_failure(&mut scope, "10.0.0.3", Some(7));

        let deferred = scope.take_deferred();
        assert_eq!(deferred.len(), 1);
        let DurableWrite::Failure(failure) = &deferred[0] else {
            panic!("expected a failure, got {:?}", deferred[0]);
        };
        assert_eq!(failure.ip, "10.0.0.3");
        assert_eq!(failure.user_id, Some(7));
        assert!(scope.take_deferred().is_empty());
    }
}
