// src/services/locker.rs

//! Per-URL advisory leases.
//!
//! At most one live lease exists per URL across all workers for the
//! duration of the TTL. Renewal is not modeled; the TTL is chosen to
//! cover a realistic processing cycle.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// A granted lease on a URL.
#[derive(Debug, Clone)]
pub struct Lease {
    pub url: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Trait for lock providers.
#[async_trait]
pub trait UrlLocker: Send + Sync {
    /// Acquire a lease on the URL for `ttl`. Contention surfaces as
    /// [`AppError::LockContended`].
    async fn lock(&self, url: &str, ttl: Duration) -> Result<Lease>;

    /// Release a lease. Callers treat failure as non-fatal; an unreleased
    /// lease expires at its TTL.
    async fn unlock(&self, lease: &Lease) -> Result<()>;
}

/// In-process reference lock provider.
#[derive(Default)]
pub struct MemoryLocker {
    leases: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UrlLocker for MemoryLocker {
    async fn lock(&self, url: &str, ttl: Duration) -> Result<Lease> {
        let now = Utc::now();
        let mut leases = self.leases.lock().await;

        if let Some((_, expires_at)) = leases.get(url) {
            if *expires_at > now {
                return Err(AppError::contended(url));
            }
        }

        let token = Uuid::new_v4();
        let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);
        leases.insert(url.to_string(), (token, expires_at));

        Ok(Lease {
            url: url.to_string(),
            token,
            expires_at,
        })
    }

    async fn unlock(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock().await;
        match leases.get(&lease.url) {
            Some((token, _)) if *token == lease.token => {
                leases.remove(&lease.url);
                Ok(())
            }
            Some(_) => Err(AppError::lock(format!(
                "lease token mismatch for {}",
                lease.url
            ))),
            // Already expired and reclaimed; releasing is a no-op.
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://api.example.com/repos/acme/widget";

    #[tokio::test]
    async fn test_second_lock_is_contended() {
        let locker = MemoryLocker::new();
        let lease = locker.lock(URL, Duration::from_secs(60)).await.unwrap();

        let contended = locker.lock(URL, Duration::from_secs(60)).await;
        assert!(matches!(
            contended,
            Err(AppError::LockContended { .. })
        ));

        locker.unlock(&lease).await.unwrap();
        assert!(locker.lock(URL, Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let locker = MemoryLocker::new();
        locker.lock(URL, Duration::from_millis(0)).await.unwrap();

        // TTL of zero expires immediately.
        assert!(locker.lock(URL, Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unlock_with_stale_token_fails() {
        let locker = MemoryLocker::new();
        let stale = locker.lock(URL, Duration::from_millis(0)).await.unwrap();
        let fresh = locker.lock(URL, Duration::from_secs(60)).await.unwrap();

        assert!(locker.unlock(&stale).await.is_err());
        locker.unlock(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_after_expiry_is_noop() {
        let locker = MemoryLocker::new();
        let lease = locker.lock(URL, Duration::from_millis(0)).await.unwrap();
        let _ = locker.lock(URL, Duration::from_millis(0)).await.unwrap();

        // Second lease also expired and the map entry was replaced; a
        // token mismatch is the only failure mode.
        assert!(locker.unlock(&lease).await.is_err());

        let mut leases = locker.leases.lock().await;
        leases.clear();
        drop(leases);
        assert!(locker.unlock(&lease).await.is_ok());
    }
}
