use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::validation::{ConfigValidator, ValidationUtils};
use crate::ConductorError;

/// 存储配置
///
/// url 决定后端：`postgres://` 走 PostgreSQL，`sqlite:` 走 SQLite。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

/// 分布式锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// 锁后端地址；`redis://` 为生产实现，`memory:` 为单进程实现
    pub url: String,
    /// 锁键前缀，多套部署共用一个Redis时隔离用
    pub key_prefix: String,
    /// 发布锁的有效期
    pub ttl_seconds: u64,
}

/// 运行器（调度面）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// 候选项扫描入队周期
    pub candidate_scan_interval_seconds: u64,
    /// 过期租约回收周期
    pub reclaim_interval_seconds: u64,
    /// 下发给 Worker 的租约有效期
    pub lease_ttl_seconds: i64,
    /// 分配时单次带出的候选批量
    pub assign_batch_size: i64,
    /// 暂时性失败的重试上限，超过后候选卡住
    pub max_run_attempts: i32,
    /// 部署方追加的暂时性结果码
    pub extra_transient_codes: Vec<String>,
}

/// 发布器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// 外部发布网关地址，实际的推送/开提案由网关执行
    pub publish_gateway_url: String,
    /// 就绪运行扫描周期
    pub scan_interval_seconds: u64,
    /// 单轮扫描处理的最大候选数
    pub batch_size: i64,
    /// 发布失败重试上限，超过后候选进入发布卡住状态
    pub max_publish_attempts: i32,
    /// 开放提案状态轮询周期
    pub proposal_check_interval_seconds: u64,
    /// 单轮轮询检查的提案数
    pub proposal_check_batch: i64,
    /// 提案被关闭（未合并）后重新入队的优先级提升量
    pub refresh_priority_boost: i32,
    /// 派生分支名前缀，完整分支名为 `{prefix}/{campaign}`
    pub branch_prefix: String,
}

/// 重试退避配置
///
/// 延迟公式为 `min(cap, base * multiplier^attempt * (1 ± jitter))`，
/// 抖动在封顶之前施加，到达封顶后延迟恒为 cap。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay_seconds: f64,
    pub multiplier: f64,
    pub cap_seconds: f64,
    /// 抖动比例，[0, 1)；还须满足 jitter < (multiplier-1)/(multiplier+1)
    /// 以保证期望延迟单调不减
    pub jitter: f64,
}

/// 发布速率限制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 滑动窗口长度
    pub window_seconds: i64,
    /// 每个论坛host在窗口内允许的新提案数
    pub max_proposals_per_window: i64,
    /// 每个论坛host允许同时开放的提案数
    pub max_open_proposals: i64,
}

/// Worker 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Worker 身份标识；设为 "auto" 时取主机名
    pub worker_id: String,
    /// 运行器的协议地址
    pub runner_url: String,
    pub capabilities: Vec<String>,
    /// 队列为空时的拉取间隔
    pub poll_interval_seconds: u64,
    /// 心跳间隔，应明显小于租约有效期
    pub heartbeat_interval_seconds: u64,
    /// 单次运行命令的执行时限，超时按 `worker-timeout` 上报
    pub command_timeout_seconds: u64,
}

/// 制品归档服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// 制品存放根目录
    pub root_dir: String,
}

/// VCS 存储服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsStoreConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// 裸仓库存放根目录
    pub root_dir: String,
}

/// 差异服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferConfig {
    pub enabled: bool,
    pub bind_address: String,
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub tracing_enabled: bool,
    pub metrics_enabled: bool,
    /// Prometheus导出器的监听地址
    pub metrics_bind_address: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub lock: LockConfig,
    pub runner: RunnerConfig,
    pub publisher: PublisherConfig,
    pub backoff: BackoffConfig,
    pub rate_limit: RateLimitConfig,
    pub worker: WorkerConfig,
    pub archive: ArchiveConfig,
    pub vcs_store: VcsStoreConfig,
    pub differ: DifferConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: "postgresql://localhost/conductor".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            lock: LockConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: "conductor:lock".to_string(),
                ttl_seconds: 120,
            },
            runner: RunnerConfig {
                enabled: true,
                bind_address: "0.0.0.0:9911".to_string(),
                candidate_scan_interval_seconds: 60,
                reclaim_interval_seconds: 60,
                lease_ttl_seconds: 300,
                assign_batch_size: 50,
                max_run_attempts: 10,
                extra_transient_codes: Vec::new(),
            },
            publisher: PublisherConfig {
                enabled: true,
                bind_address: "0.0.0.0:9912".to_string(),
                publish_gateway_url: "http://localhost:9914".to_string(),
                scan_interval_seconds: 300,
                batch_size: 50,
                max_publish_attempts: 6,
                proposal_check_interval_seconds: 900,
                proposal_check_batch: 10,
                refresh_priority_boost: 2,
                branch_prefix: "conductor".to_string(),
            },
            backoff: BackoffConfig {
                base_delay_seconds: 60.0,
                multiplier: 2.0,
                cap_seconds: 3600.0,
                jitter: 0.1,
            },
            rate_limit: RateLimitConfig {
                window_seconds: 3600,
                max_proposals_per_window: 12,
                max_open_proposals: 40,
            },
            worker: WorkerConfig {
                enabled: false,
                worker_id: "worker-001".to_string(),
                runner_url: "http://localhost:9911".to_string(),
                capabilities: Vec::new(),
                poll_interval_seconds: 5,
                heartbeat_interval_seconds: 60,
                command_timeout_seconds: 3600,
            },
            archive: ArchiveConfig {
                enabled: false,
                bind_address: "0.0.0.0:9913".to_string(),
                root_dir: "/var/lib/conductor/artifacts".to_string(),
            },
            vcs_store: VcsStoreConfig {
                enabled: false,
                bind_address: "0.0.0.0:9921".to_string(),
                root_dir: "/var/lib/conductor/vcs".to_string(),
            },
            differ: DifferConfig {
                enabled: false,
                bind_address: "0.0.0.0:9920".to_string(),
            },
            observability: ObservabilityConfig {
                tracing_enabled: true,
                metrics_enabled: true,
                metrics_bind_address: "127.0.0.1:9090".to_string(),
                log_level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/conductor.toml",
                "conductor.toml",
                "/etc/conductor/config.toml",
            ];

            let mut config_file_found = false;
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    config_file_found = true;
                    break;
                }
            }

            if !config_file_found {
                builder = builder
                    .set_default("store.url", "postgresql://localhost/conductor")?
                    .set_default("store.max_connections", 10)?
                    .set_default("store.min_connections", 1)?
                    .set_default("store.connection_timeout_seconds", 30)?
                    .set_default("store.idle_timeout_seconds", 600)?
                    .set_default("lock.url", "redis://localhost:6379")?
                    .set_default("lock.key_prefix", "conductor:lock")?
                    .set_default("lock.ttl_seconds", 120)?
                    .set_default("runner.enabled", true)?
                    .set_default("runner.bind_address", "0.0.0.0:9911")?
                    .set_default("runner.candidate_scan_interval_seconds", 60)?
                    .set_default("runner.reclaim_interval_seconds", 60)?
                    .set_default("runner.lease_ttl_seconds", 300)?
                    .set_default("runner.assign_batch_size", 50)?
                    .set_default("runner.max_run_attempts", 10)?
                    .set_default("runner.extra_transient_codes", Vec::<String>::new())?
                    .set_default("publisher.enabled", true)?
                    .set_default("publisher.bind_address", "0.0.0.0:9912")?
                    .set_default("publisher.publish_gateway_url", "http://localhost:9914")?
                    .set_default("publisher.scan_interval_seconds", 300)?
                    .set_default("publisher.batch_size", 50)?
                    .set_default("publisher.max_publish_attempts", 6)?
                    .set_default("publisher.proposal_check_interval_seconds", 900)?
                    .set_default("publisher.proposal_check_batch", 10)?
                    .set_default("publisher.refresh_priority_boost", 2)?
                    .set_default("publisher.branch_prefix", "conductor")?
                    .set_default("backoff.base_delay_seconds", 60.0)?
                    .set_default("backoff.multiplier", 2.0)?
                    .set_default("backoff.cap_seconds", 3600.0)?
                    .set_default("backoff.jitter", 0.1)?
                    .set_default("rate_limit.window_seconds", 3600)?
                    .set_default("rate_limit.max_proposals_per_window", 12)?
                    .set_default("rate_limit.max_open_proposals", 40)?
                    .set_default("worker.enabled", false)?
                    .set_default("worker.worker_id", "worker-001")?
                    .set_default("worker.runner_url", "http://localhost:9911")?
                    .set_default("worker.capabilities", Vec::<String>::new())?
                    .set_default("worker.poll_interval_seconds", 5)?
                    .set_default("worker.heartbeat_interval_seconds", 60)?
                    .set_default("worker.command_timeout_seconds", 3600)?
                    .set_default("archive.enabled", false)?
                    .set_default("archive.bind_address", "0.0.0.0:9913")?
                    .set_default("archive.root_dir", "/var/lib/conductor/artifacts")?
                    .set_default("vcs_store.enabled", false)?
                    .set_default("vcs_store.bind_address", "0.0.0.0:9921")?
                    .set_default("vcs_store.root_dir", "/var/lib/conductor/vcs")?
                    .set_default("differ.enabled", false)?
                    .set_default("differ.bind_address", "0.0.0.0:9920")?
                    .set_default("observability.tracing_enabled", true)?
                    .set_default("observability.metrics_enabled", true)?
                    .set_default("observability.metrics_bind_address", "127.0.0.1:9090")?
                    .set_default("observability.log_level", "info")?;
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CONDUCTOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        self.store.validate()?;
        self.lock.validate()?;
        self.runner.validate()?;
        self.publisher.validate()?;
        self.backoff.validate()?;
        self.rate_limit.validate()?;
        self.worker.validate()?;
        self.archive.validate()?;
        self.vcs_store.validate()?;
        self.differ.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

impl ConfigValidator for StoreConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "store.url")?;

        let recognized = self.url.starts_with("postgresql://")
            || self.url.starts_with("postgres://")
            || self.url.starts_with("sqlite:");
        if !recognized {
            return Err(ConductorError::Configuration(format!(
                "store.url 不是可识别的数据库地址: {}",
                self.url
            )));
        }

        if self.max_connections == 0 {
            return Err(ConductorError::Configuration(
                "store.max_connections 必须大于0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConductorError::Configuration(
                "store.min_connections 不能大于 max_connections".to_string(),
            ));
        }
        ValidationUtils::validate_positive_u64(
            self.connection_timeout_seconds,
            "store.connection_timeout_seconds",
        )?;
        Ok(())
    }
}

impl ConfigValidator for LockConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "lock.url")?;
        if !self.url.starts_with("redis://") && !self.url.starts_with("memory:") {
            return Err(ConductorError::Configuration(format!(
                "lock.url 必须以 redis:// 或 memory: 开头: {}",
                self.url
            )));
        }
        ValidationUtils::validate_not_empty(&self.key_prefix, "lock.key_prefix")?;
        ValidationUtils::validate_positive_u64(self.ttl_seconds, "lock.ttl_seconds")?;
        Ok(())
    }
}

impl ConfigValidator for RunnerConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_bind_address(&self.bind_address, "runner.bind_address")?;
        ValidationUtils::validate_positive_u64(
            self.candidate_scan_interval_seconds,
            "runner.candidate_scan_interval_seconds",
        )?;
        ValidationUtils::validate_positive_u64(
            self.reclaim_interval_seconds,
            "runner.reclaim_interval_seconds",
        )?;
        ValidationUtils::validate_positive_i64(self.lease_ttl_seconds, "runner.lease_ttl_seconds")?;
        ValidationUtils::validate_positive_i64(self.assign_batch_size, "runner.assign_batch_size")?;
        if self.max_run_attempts <= 0 {
            return Err(ConductorError::Configuration(
                "runner.max_run_attempts 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigValidator for PublisherConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_bind_address(&self.bind_address, "publisher.bind_address")?;
        ValidationUtils::validate_not_empty(
            &self.publish_gateway_url,
            "publisher.publish_gateway_url",
        )?;
        ValidationUtils::validate_positive_u64(
            self.scan_interval_seconds,
            "publisher.scan_interval_seconds",
        )?;
        ValidationUtils::validate_positive_i64(self.batch_size, "publisher.batch_size")?;
        if self.max_publish_attempts <= 0 {
            return Err(ConductorError::Configuration(
                "publisher.max_publish_attempts 必须大于0".to_string(),
            ));
        }
        ValidationUtils::validate_positive_u64(
            self.proposal_check_interval_seconds,
            "publisher.proposal_check_interval_seconds",
        )?;
        ValidationUtils::validate_positive_i64(
            self.proposal_check_batch,
            "publisher.proposal_check_batch",
        )?;
        ValidationUtils::validate_not_empty(&self.branch_prefix, "publisher.branch_prefix")?;
        Ok(())
    }
}

impl ConfigValidator for BackoffConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        if self.base_delay_seconds <= 0.0 {
            return Err(ConductorError::Configuration(
                "backoff.base_delay_seconds 必须大于0".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConductorError::Configuration(
                "backoff.multiplier 不能小于1".to_string(),
            ));
        }
        if self.cap_seconds < self.base_delay_seconds {
            return Err(ConductorError::Configuration(
                "backoff.cap_seconds 不能小于 base_delay_seconds".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConductorError::Configuration(
                "backoff.jitter 必须位于 [0, 1)".to_string(),
            ));
        }
        // 抖动过大时相邻尝试的延迟区间重叠，期望延迟不再单调
        if self.multiplier > 1.0 {
            let bound = (self.multiplier - 1.0) / (self.multiplier + 1.0);
            if self.jitter >= bound {
                return Err(ConductorError::Configuration(format!(
                    "backoff.jitter 必须小于 (multiplier-1)/(multiplier+1) = {bound:.3}"
                )));
            }
        } else if self.jitter > 0.0 {
            return Err(ConductorError::Configuration(
                "backoff.multiplier 为1时 jitter 必须为0".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigValidator for RateLimitConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_positive_i64(self.window_seconds, "rate_limit.window_seconds")?;
        ValidationUtils::validate_positive_i64(
            self.max_proposals_per_window,
            "rate_limit.max_proposals_per_window",
        )?;
        ValidationUtils::validate_positive_i64(
            self.max_open_proposals,
            "rate_limit.max_open_proposals",
        )?;
        Ok(())
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        ValidationUtils::validate_not_empty(&self.runner_url, "worker.runner_url")?;
        ValidationUtils::validate_positive_u64(
            self.poll_interval_seconds,
            "worker.poll_interval_seconds",
        )?;
        ValidationUtils::validate_positive_u64(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_positive_u64(
            self.command_timeout_seconds,
            "worker.command_timeout_seconds",
        )?;
        Ok(())
    }
}

impl ConfigValidator for ArchiveConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_bind_address(&self.bind_address, "archive.bind_address")?;
        ValidationUtils::validate_not_empty(&self.root_dir, "archive.root_dir")?;
        Ok(())
    }
}

impl ConfigValidator for VcsStoreConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_bind_address(&self.bind_address, "vcs_store.bind_address")?;
        ValidationUtils::validate_not_empty(&self.root_dir, "vcs_store.root_dir")?;
        Ok(())
    }
}

impl ConfigValidator for DifferConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_bind_address(&self.bind_address, "differ.bind_address")?;
        Ok(())
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConductorResult<()> {
        ValidationUtils::validate_not_empty(&self.log_level, "observability.log_level")?;
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.trim()) {
            return Err(ConductorError::Configuration(format!(
                "observability.log_level 不是合法级别: {}",
                self.log_level
            )));
        }
        if self.metrics_enabled {
            ValidationUtils::validate_bind_address(
                &self.metrics_bind_address,
                "observability.metrics_bind_address",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runner.lease_ttl_seconds, 300);
        assert_eq!(config.publisher.max_publish_attempts, 6);
        assert_eq!(config.rate_limit.max_open_proposals, 40);
    }

    #[test]
    fn test_from_toml_full_document() {
        let toml_str = r#"
            [store]
            url = "sqlite::memory:"
            max_connections = 5
            min_connections = 1
            connection_timeout_seconds = 10
            idle_timeout_seconds = 300

            [lock]
            url = "memory:"
            key_prefix = "test:lock"
            ttl_seconds = 60

            [runner]
            enabled = true
            bind_address = "127.0.0.1:9911"
            candidate_scan_interval_seconds = 30
            reclaim_interval_seconds = 15
            lease_ttl_seconds = 120
            assign_batch_size = 10
            max_run_attempts = 5
            extra_transient_codes = ["mirror-sync-pending"]

            [publisher]
            enabled = false
            bind_address = "127.0.0.1:9912"
            publish_gateway_url = "http://127.0.0.1:9914"
            scan_interval_seconds = 120
            batch_size = 20
            max_publish_attempts = 4
            proposal_check_interval_seconds = 600
            proposal_check_batch = 5
            refresh_priority_boost = 3
            branch_prefix = "bot"

            [backoff]
            base_delay_seconds = 1.0
            multiplier = 2.0
            cap_seconds = 60.0
            jitter = 0.0

            [rate_limit]
            window_seconds = 1800
            max_proposals_per_window = 6
            max_open_proposals = 10

            [worker]
            enabled = false
            worker_id = "w1"
            runner_url = "http://127.0.0.1:9911"
            capabilities = ["debian", "rust"]
            poll_interval_seconds = 2
            heartbeat_interval_seconds = 30
            command_timeout_seconds = 1200

            [archive]
            enabled = false
            bind_address = "127.0.0.1:9913"
            root_dir = "/tmp/artifacts"

            [vcs_store]
            enabled = false
            bind_address = "127.0.0.1:9921"
            root_dir = "/tmp/vcs"

            [differ]
            enabled = false
            bind_address = "127.0.0.1:9920"

            [observability]
            tracing_enabled = true
            metrics_enabled = false
            metrics_bind_address = "127.0.0.1:9090"
            log_level = "debug"
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.store.url, "sqlite::memory:");
        assert_eq!(config.runner.lease_ttl_seconds, 120);
        assert_eq!(
            config.runner.extra_transient_codes,
            vec!["mirror-sync-pending".to_string()]
        );
        assert!(!config.publisher.enabled);
        assert_eq!(config.worker.capabilities.len(), 2);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = AppConfig::default();
        let serialized = config.to_toml().unwrap();
        let restored = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(restored.store.url, config.store.url);
        assert_eq!(restored.backoff.multiplier, config.backoff.multiplier);
    }

    #[test]
    fn test_jitter_bound_enforced() {
        let mut config = AppConfig::default();
        // multiplier 2.0 的单调上界是 1/3
        config.backoff.jitter = 0.4;
        assert!(config.validate().is_err());

        config.backoff.jitter = 0.3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_url_scheme_checked() {
        let mut config = AppConfig::default();
        config.store.url = "mysql://localhost/x".to_string();
        assert!(config.validate().is_err());

        config.store.url = "sqlite:conductor.db".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_lease_ttl_rejected() {
        let mut config = AppConfig::default();
        config.runner.lease_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }
}
