use crate::types::UserId;
use async_trait::async_trait;
use moka::future::Cache;
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Minimum-interval gate on repeated writes to one resource.
#[async_trait]
pub trait UpdateThrottle: Send + Sync {
    /// Admit a write for `key` unless one was admitted within the window.
    /// Admission and recording happen as one step per key.
    async fn try_acquire(&self, key: UserId) -> bool;
}

/// In-process throttle: a TTL cache keyed by user, the entry's lifetime is the window.
#[derive(Clone)]
pub struct MokaThrottle {
    admitted: Cache<UserId, Instant>,
}

impl MokaThrottle {
    pub fn new(window: Duration) -> Self {
        let admitted = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(window)
            .build();
        Self { admitted }
    }
}

#[async_trait]
impl UpdateThrottle for MokaThrottle {
    async fn try_acquire(&self, key: UserId) -> bool {
        // Only the caller that inserted the entry gets through
        self.admitted.entry(key).or_insert(Instant::now()).await.is_fresh()
    }
}

/// Caps the number of attempts one client address may make per window.
#[async_trait]
pub trait AttemptLimiter: Send + Sync {
    /// Count an attempt from `client`. Returns false once the window's allowance is used up.
    async fn try_attempt(&self, client: IpAddr) -> bool;
}

/// Fixed window per address, opened by its first attempt. Every attempt counts,
/// successful or not.
#[derive(Clone)]
pub struct MokaAttemptLimiter {
    attempts: Cache<IpAddr, Arc<AtomicU32>>,
    max_attempts: u32,
}

impl MokaAttemptLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        let attempts = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(window)
            .build();
        Self { attempts, max_attempts }
    }
}

#[async_trait]
impl AttemptLimiter for MokaAttemptLimiter {
    async fn try_attempt(&self, client: IpAddr) -> bool {
        let counter = self
            .attempts
            .get_with(client, async { Arc::new(AtomicU32::new(0)) })
            .await;
        counter.fetch_add(1, Ordering::AcqRel) < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[tokio::test]
    async fn attempts_beyond_the_allowance_are_refused() {
        let limiter = MokaAttemptLimiter::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert!(limiter.try_attempt(ip(1)).await);
        }
        assert!(!limiter.try_attempt(ip(1)).await);
        assert!(!limiter.try_attempt(ip(1)).await);
        // Each address has its own allowance
        assert!(limiter.try_attempt(ip(2)).await);
    }

    #[tokio::test]
    async fn allowance_returns_when_the_window_expires() {
        let limiter = MokaAttemptLimiter::new(1, Duration::from_millis(50));

        assert!(limiter.try_attempt(ip(3)).await);
        assert!(!limiter.try_attempt(ip(3)).await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(limiter.try_attempt(ip(3)).await);
    }

    #[tokio::test]
    async fn concurrent_attempts_never_exceed_the_allowance() {
        let limiter = MokaAttemptLimiter::new(5, Duration::from_secs(60));

        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.try_attempt(ip(4)).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn second_write_within_window_is_rejected() {
        let throttle = MokaThrottle::new(Duration::from_secs(60));
        let user = Uuid::new_v4();

        assert!(throttle.try_acquire(user).await);
        assert!(!throttle.try_acquire(user).await);
        // Other users are unaffected
        assert!(throttle.try_acquire(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn writes_are_admitted_again_after_the_window() {
        let throttle = MokaThrottle::new(Duration::from_millis(50));
        let user = Uuid::new_v4();

        assert!(throttle.try_acquire(user).await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(throttle.try_acquire(user).await);
    }

    #[tokio::test]
    async fn concurrent_writes_admit_exactly_one() {
        let throttle = MokaThrottle::new(Duration::from_secs(60));
        let user = Uuid::new_v4();

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move { throttle.try_acquire(user).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
