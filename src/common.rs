use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use conductor_core::AppConfig;
use conductor_infrastructure::{init_metrics_exporter, init_tracing};
use tokio::signal;
use tracing::{error, info, warn};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

/// 通用的应用启动配置
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub worker_id: Option<String>,
}

/// 加载应用配置
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref())
        .context("加载配置文件失败")?;

    // 命令行指定的worker-id覆盖配置
    if let Some(ref worker_id) = startup_config.worker_id {
        config.worker.worker_id = worker_id.clone();
    }

    Ok(config)
}

/// 启动应用程序的通用函数
///
/// 各入口二进制共用的完整启动流程：日志、配置、指标导出、
/// 应用组装、信号处理与限时优雅关闭。
pub async fn start_application(
    startup_config: StartupConfig,
    mode_str: &str,
    service_name: &str,
) -> Result<()> {
    init_tracing(&startup_config.log_level, &startup_config.log_format)?;

    info!("启动 {} 服务", service_name);
    if let Some(ref path) = startup_config.config_path {
        info!("配置文件: {path}");
    }
    info!("运行模式: {mode_str}");
    if let Some(ref worker_id) = startup_config.worker_id {
        info!("Worker ID: {worker_id}");
    }

    let config = load_config(&startup_config)?;
    let app_mode = parse_app_mode(mode_str, &config)?;

    if config.observability.metrics_enabled {
        init_metrics_exporter(&config.observability.metrics_bind_address)?;
    }

    let app = Application::new(config, app_mode).await?;

    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_tx = shutdown_manager.sender();

        tokio::spawn(async move {
            if let Err(e) = app.run(&shutdown_tx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(result) => {
            if let Err(e) = result {
                error!("应用关闭时发生错误: {e}");
            } else {
                info!("{} 服务已优雅关闭", service_name);
            }
        }
        Err(_) => {
            warn!("{} 服务关闭超时，强制退出", service_name);
        }
    }

    info!("{} 服务已退出", service_name);
    Ok(())
}

/// 解析运行模式并校验对应配置节是否启用
pub fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    match mode_str {
        "runner" => {
            if !config.runner.enabled {
                return Err(anyhow::anyhow!("runner模式被禁用，请检查配置"));
            }
            Ok(AppMode::Runner)
        }
        "publisher" => {
            if !config.publisher.enabled {
                return Err(anyhow::anyhow!("publisher模式被禁用，请检查配置"));
            }
            Ok(AppMode::Publisher)
        }
        "worker" => {
            if !config.worker.enabled {
                return Err(anyhow::anyhow!("worker模式被禁用，请检查配置"));
            }
            Ok(AppMode::Worker)
        }
        "archive" => {
            if !config.archive.enabled {
                return Err(anyhow::anyhow!("archive模式被禁用，请检查配置"));
            }
            Ok(AppMode::Archive)
        }
        "vcs-store" => {
            if !config.vcs_store.enabled {
                return Err(anyhow::anyhow!("vcs-store模式被禁用，请检查配置"));
            }
            Ok(AppMode::VcsStore)
        }
        "differ" => {
            if !config.differ.enabled {
                return Err(anyhow::anyhow!("differ模式被禁用，请检查配置"));
            }
            Ok(AppMode::Differ)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.unwrap_or_else(|e| {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::process::exit(1);
        })
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => signal.recv().await,
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::process::exit(1);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_mode_rejects_disabled_section() {
        let mut config = AppConfig::default();
        config.publisher.enabled = false;
        assert!(parse_app_mode("publisher", &config).is_err());
        assert!(matches!(
            parse_app_mode("runner", &config).unwrap(),
            AppMode::Runner
        ));
    }

    #[test]
    fn test_parse_app_mode_unknown_string() {
        let config = AppConfig::default();
        assert!(parse_app_mode("dispatcher", &config).is_err());
    }

    #[test]
    fn test_all_mode_needs_no_enabled_sections() {
        let mut config = AppConfig::default();
        config.runner.enabled = false;
        config.publisher.enabled = false;
        assert!(matches!(
            parse_app_mode("all", &config).unwrap(),
            AppMode::All
        ));
    }
}
