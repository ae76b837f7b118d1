//! 分布式锁实现
//!
//! 发布路径的目标级互斥锁。生产部署用 Redis 后端（SET NX PX 加
//! 令牌校验脚本），单进程与测试场景用内存后端。

pub mod memory_lock;
pub mod redis_lock;

pub use memory_lock::MemoryLockService;
pub use redis_lock::RedisLockService;

use std::sync::Arc;

use conductor_core::{config::LockConfig, traits::LockService, ConductorError, ConductorResult};
use tracing::info;

/// 根据配置 URL 选择锁后端
pub async fn lock_service_from_config(
    config: &LockConfig,
) -> ConductorResult<Arc<dyn LockService>> {
    if config.url.starts_with("redis://") || config.url.starts_with("rediss://") {
        let service = RedisLockService::new(&config.url, &config.key_prefix).await?;
        info!("锁服务已就绪: 后端=redis 前缀={}", config.key_prefix);
        Ok(Arc::new(service))
    } else if config.url.starts_with("memory:") {
        info!("锁服务已就绪: 后端=memory");
        Ok(Arc::new(MemoryLockService::new()))
    } else {
        Err(ConductorError::Configuration(format!(
            "不支持的锁后端: {}",
            config.url
        )))
    }
}
