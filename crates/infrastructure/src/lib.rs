//! 基础设施层
//!
//! 提供核心抽象的具体实现：双后端数据仓储、Redis/内存分布式锁、
//! HTTP 发布机制与可观测性初始化。

pub mod database;
pub mod lock;
pub mod observability;
pub mod publish;

pub use database::{DatabaseManager, DatabasePool, DatabaseType};
pub use lock::{lock_service_from_config, MemoryLockService, RedisLockService};
pub use observability::{init_metrics_exporter, init_tracing, mask_url, MetricsCollector};
pub use publish::HttpPublishMechanism;
