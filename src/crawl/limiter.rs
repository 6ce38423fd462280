//! Per-domain connection limiting
//!
//! Each domain gets its own semaphore, so a slow or busy domain only stalls
//! workers that are fetching from it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct DomainLimiter {
    permits_per_domain: usize,
    domains: DashMap<String, Arc<Semaphore>>,
}

impl DomainLimiter {
    pub fn new(permits_per_domain: usize) -> Self {
        Self {
            permits_per_domain: permits_per_domain.max(1),
            domains: DashMap::new(),
        }
    }

    fn semaphore(&self, domain: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.domains.get(domain) {
            return sem.clone();
        }
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.permits_per_domain)))
            .clone()
    }

    /// Wait for a connection slot on `domain`. The slot is released when the
    /// permit is dropped. Returns `None` only if the semaphore was closed.
    pub async fn acquire(&self, domain: &str) -> Option<OwnedSemaphorePermit> {
        self.semaphore(domain).acquire_owned().await.ok()
    }

    /// Slots currently free on `domain`
    pub fn available(&self, domain: &str) -> usize {
        self.domains
            .get(domain)
            .map(|sem| sem.available_permits())
            .unwrap_or(self.permits_per_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limits_one_domain_only() {
        let limiter = DomainLimiter::new(2);

        let a1 = limiter.acquire("a.com").await.unwrap();
        let _a2 = limiter.acquire("a.com").await.unwrap();
        assert_eq!(limiter.available("a.com"), 0);

        // Third slot on a.com blocks
        let blocked = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("a.com")).await;
        assert!(blocked.is_err());

        // Other domains are unaffected
        let _b = limiter.acquire("b.com").await.unwrap();
        assert_eq!(limiter.available("b.com"), 1);

        drop(a1);
        assert_eq!(limiter.available("a.com"), 1);
    }

    #[test]
    fn test_zero_is_clamped() {
        let limiter = DomainLimiter::new(0);
        assert_eq!(limiter.available("x.com"), 1);
    }
}
