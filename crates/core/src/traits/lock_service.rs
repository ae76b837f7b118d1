//! 分布式锁接口定义
//!
//! 发布路径用目标级互斥锁保证同一目标上同时最多进行一次发布。
//! 锁是带令牌的租约式锁：持有方只能用自己的令牌续期或释放，
//! 过期后锁自动可被他人获取，令牌校验保证迟到的释放不会误伤
//! 新持有者。

use crate::ConductorResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 锁持有凭据
///
/// `token` 是获取时生成的随机值，续期与释放都必须出示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub key: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl LockHandle {
    pub fn new(key: impl Into<String>, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 分布式锁服务接口
#[async_trait]
pub trait LockService: Send + Sync {
    /// 尝试获取锁，快速失败
    ///
    /// 锁空闲时立即持有并返回凭据；已被持有时不等待，直接返回
    /// `LockContended`。调用方应把争用视为推迟信号而不是错误。
    ///
    /// # 错误
    ///
    /// * `LockContended` - 锁正被其他持有者占用
    /// * `LockService` - 锁后端不可用
    async fn acquire(&self, key: &str, ttl_seconds: u64) -> ConductorResult<LockHandle>;

    /// 用凭据续期锁
    ///
    /// 仅当锁仍由该令牌持有时生效，返回带新过期时间的凭据。
    ///
    /// # 错误
    ///
    /// * `LockExpired` - 锁已过期或已被其他持有者取得
    async fn renew(&self, handle: &LockHandle, ttl_seconds: u64) -> ConductorResult<LockHandle>;

    /// 用凭据释放锁
    ///
    /// 令牌仍然有效时释放并返回 `true`；锁已过期或已被他人持有
    /// 时不做修改并返回 `false`。释放是幂等的。
    async fn release(&self, handle: &LockHandle) -> ConductorResult<bool>;
}
