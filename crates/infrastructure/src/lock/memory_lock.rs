use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conductor_core::{
    traits::{LockHandle, LockService},
    ConductorError, ConductorResult,
};
use tokio::sync::Mutex;
use uuid::Uuid;

struct HeldLock {
    token: String,
    expires_at: DateTime<Utc>,
}

/// 进程内目标锁
///
/// 嵌入式部署与测试用，令牌与过期语义和 Redis 后端一致。
#[derive(Default)]
pub struct MemoryLockService {
    locks: Mutex<HashMap<String, HeldLock>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, key: &str, ttl_seconds: u64) -> ConductorResult<LockHandle> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;

        if let Some(held) = locks.get(key) {
            if held.expires_at > now {
                return Err(ConductorError::LockContended {
                    key: key.to_string(),
                });
            }
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = now + Duration::seconds(ttl_seconds as i64);
        locks.insert(
            key.to_string(),
            HeldLock {
                token: token.clone(),
                expires_at,
            },
        );
        Ok(LockHandle::new(key, token, expires_at))
    }

    async fn renew(&self, handle: &LockHandle, ttl_seconds: u64) -> ConductorResult<LockHandle> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;

        match locks.get_mut(&handle.key) {
            Some(held) if held.token == handle.token && held.expires_at > now => {
                held.expires_at = now + Duration::seconds(ttl_seconds as i64);
                Ok(LockHandle::new(
                    handle.key.as_str(),
                    handle.token.as_str(),
                    held.expires_at,
                ))
            }
            _ => Err(ConductorError::LockExpired {
                key: handle.key.clone(),
            }),
        }
    }

    async fn release(&self, handle: &LockHandle) -> ConductorResult<bool> {
        let now = Utc::now();
        let mut locks = self.locks.lock().await;

        match locks.get(&handle.key) {
            Some(held) if held.token == handle.token && held.expires_at > now => {
                locks.remove(&handle.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_exclusive_until_release() {
        let service = MemoryLockService::new();

        let handle = service.acquire("publish:example.org/repo", 30).await.unwrap();
        let contended = service.acquire("publish:example.org/repo", 30).await;
        assert!(matches!(
            contended,
            Err(ConductorError::LockContended { .. })
        ));

        assert!(service.release(&handle).await.unwrap());
        service.acquire("publish:example.org/repo", 30).await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let service = MemoryLockService::new();

        service.acquire("publish:a", 30).await.unwrap();
        service.acquire("publish:b", 30).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let service = MemoryLockService::new();

        let handle = service.acquire("publish:repo", 30).await.unwrap();
        assert!(service.release(&handle).await.unwrap());
        assert!(!service.release(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_is_reacquirable() {
        let service = MemoryLockService::new();

        let stale = service.acquire("publish:repo", 0).await.unwrap();
        let fresh = service.acquire("publish:repo", 30).await.unwrap();
        assert_ne!(stale.token, fresh.token);

        // 过期持有者的令牌不能再释放或续期
        assert!(!service.release(&stale).await.unwrap());
        assert!(matches!(
            service.renew(&stale, 30).await,
            Err(ConductorError::LockExpired { .. })
        ));

        assert!(service.release(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_extends_expiry() {
        let service = MemoryLockService::new();

        let handle = service.acquire("publish:repo", 30).await.unwrap();
        let renewed = service.renew(&handle, 120).await.unwrap();
        assert!(renewed.expires_at > handle.expires_at);
        assert_eq!(renewed.token, handle.token);
    }
}
