use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use conductor_core::{
    traits::{LockHandle, LockService},
    ConductorError, ConductorResult,
};
use redis::Script;
use tracing::{debug, instrument};
use uuid::Uuid;

/// 令牌校验通过才续期，防止为他人的锁延命
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// 令牌校验通过才删除，迟到的释放不会误删新持有者的锁
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis 目标锁
///
/// 单实例令牌锁：`SET key token NX PX ttl` 获取，Lua 脚本校验令牌
/// 后续期或删除。过期由 Redis 的键过期机制兜底，进程崩溃后锁在
/// TTL 内自动失效。
pub struct RedisLockService {
    client: Arc<redis::Client>,
    key_prefix: String,
    renew_script: Script,
    release_script: Script,
}

impl RedisLockService {
    pub async fn new(url: &str, key_prefix: &str) -> ConductorResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ConductorError::LockService(format!("创建Redis客户端失败: {e}")))?;

        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| ConductorError::LockService(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ConductorError::LockService(format!("Redis PING失败: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            key_prefix: key_prefix.to_string(),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn get_connection(&self) -> ConductorResult<redis::aio::ConnectionManager> {
        self.client
            .get_connection_manager()
            .await
            .map_err(|e| ConductorError::LockService(e.to_string()))
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

#[async_trait]
impl LockService for RedisLockService {
    #[instrument(skip(self))]
    async fn acquire(&self, key: &str, ttl_seconds: u64) -> ConductorResult<LockHandle> {
        let full_key = self.build_key(key);
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut conn = self.get_connection().await?;

        let result: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_seconds * 1000)
            .query_async(&mut conn)
            .await
            .map_err(|e| ConductorError::LockService(format!("获取锁失败: {e}")))?;

        match result {
            Some(_) => {
                debug!("锁已获取: {full_key}");
                Ok(LockHandle::new(
                    key,
                    token,
                    now + Duration::seconds(ttl_seconds as i64),
                ))
            }
            None => Err(ConductorError::LockContended {
                key: key.to_string(),
            }),
        }
    }

    #[instrument(skip(self, handle), fields(key = %handle.key))]
    async fn renew(&self, handle: &LockHandle, ttl_seconds: u64) -> ConductorResult<LockHandle> {
        let full_key = self.build_key(&handle.key);
        let now = Utc::now();
        let mut conn = self.get_connection().await?;

        let renewed: i64 = self
            .renew_script
            .key(&full_key)
            .arg(&handle.token)
            .arg(ttl_seconds * 1000)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ConductorError::LockService(format!("续期锁失败: {e}")))?;

        if renewed == 1 {
            Ok(LockHandle::new(
                handle.key.as_str(),
                handle.token.as_str(),
                now + Duration::seconds(ttl_seconds as i64),
            ))
        } else {
            Err(ConductorError::LockExpired {
                key: handle.key.clone(),
            })
        }
    }

    #[instrument(skip(self, handle), fields(key = %handle.key))]
    async fn release(&self, handle: &LockHandle) -> ConductorResult<bool> {
        let full_key = self.build_key(&handle.key);
        let mut conn = self.get_connection().await?;

        let deleted: i64 = self
            .release_script
            .key(&full_key)
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ConductorError::LockService(format!("释放锁失败: {e}")))?;

        if deleted == 0 {
            debug!("释放时锁已不再持有: {full_key}");
        }
        Ok(deleted == 1)
    }
}
