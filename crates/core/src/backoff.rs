//! 重试退避延迟计算
//!
//! 延迟是 (尝试次数, 配置, 抖动样本) 的纯函数，随机源由调用方
//! 注入，测试不需要模拟时钟。运行重试与发布重试共用同一条曲线。

use chrono::{DateTime, Duration, Utc};

use crate::config::BackoffConfig;

/// 计算第 `attempt_count` 次失败后的重试延迟秒数
///
/// `unit_jitter` 取 [-1, 1] 的抖动样本。未封顶时延迟为
/// `base * multiplier^attempt * (1 + jitter * unit_jitter)`，再以 cap
/// 截断；指数项本身达到 cap 后延迟恒为 cap，与抖动符号无关。
pub fn delay_seconds(config: &BackoffConfig, attempt_count: i32, unit_jitter: f64) -> f64 {
    let exponential = config.base_delay_seconds * config.multiplier.powi(attempt_count);
    if exponential >= config.cap_seconds {
        return config.cap_seconds;
    }
    let jittered = exponential * (1.0 + config.jitter * unit_jitter.clamp(-1.0, 1.0));
    jittered.min(config.cap_seconds)
}

/// 以随机抖动样本计算下次可调度时间
pub fn next_eligible_at(
    config: &BackoffConfig,
    attempt_count: i32,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let unit_jitter = (rand::random::<f64>() - 0.5) * 2.0;
    let delay = delay_seconds(config, attempt_count, unit_jitter);
    now + Duration::milliseconds((delay * 1000.0) as i64)
}
