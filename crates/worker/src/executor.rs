//! 运行执行器
//!
//! 每次分配在独立的临时工作目录里执行候选项命令，目录随执行
//! 结束销毁。命令经 `sh -c` 解释，活动上下文通过环境变量传入。
//! 超时与启动失败分别上报 `worker-timeout` 与
//! `session-setup-failure`，两者都会被控制面归为暂时性失败。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use conductor_core::models::{AssignmentPayload, ResultSubmission};

/// 结果制品里保留的输出行数上限
const OUTPUT_TAIL_LINES: usize = 50;

#[async_trait]
pub trait RunExecutor: Send + Sync {
    /// 执行一次分配并产出终态结果
    ///
    /// 执行器不返回错误：所有失败都编码为带结果码的提交，
    /// 由控制面归类为暂时性或永久性。
    async fn execute(&self, assignment: &AssignmentPayload) -> ResultSubmission;
}

/// 用shell解释候选项命令的默认执行器
pub struct ShellExecutor {
    command_timeout_seconds: u64,
}

impl ShellExecutor {
    pub fn new(command_timeout_seconds: u64) -> Self {
        Self {
            command_timeout_seconds,
        }
    }
}

#[async_trait]
impl RunExecutor for ShellExecutor {
    async fn execute(&self, assignment: &AssignmentPayload) -> ResultSubmission {
        let descriptor = &assignment.candidate;
        info!(
            "开始执行: run={} {}/{} 尝试={}",
            assignment.run_id, descriptor.campaign, descriptor.target, descriptor.attempt
        );

        let workdir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return ResultSubmission::failure(
                    "session-setup-failure",
                    &format!("failed to create working directory: {e}"),
                )
            }
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&descriptor.command)
            .current_dir(workdir.path())
            .env("CONDUCTOR_CAMPAIGN", &descriptor.campaign)
            .env("CONDUCTOR_TARGET", &descriptor.target)
            .env("CONDUCTOR_RUN_ID", &assignment.run_id)
            .env("CONDUCTOR_ATTEMPT", descriptor.attempt.to_string())
            .env("CONDUCTOR_REFRESH", if descriptor.refresh { "1" } else { "0" })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ResultSubmission::failure(
                    "session-setup-failure",
                    &format!("failed to spawn command: {e}"),
                )
            }
        };

        let stdout_task = tokio::spawn(read_tail(child.stdout.take()));
        let stderr_task = tokio::spawn(read_tail(child.stderr.take()));

        let timeout = Duration::from_secs(self.command_timeout_seconds);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return ResultSubmission::failure(
                    "worker-failure",
                    &format!("failed to wait for command: {e}"),
                )
            }
            Err(_) => {
                let _ = child.kill().await;
                warn!(
                    "执行超时: run={} 超过 {}s",
                    assignment.run_id, self.command_timeout_seconds
                );
                return ResultSubmission::failure(
                    "worker-timeout",
                    &format!("command exceeded {}s", self.command_timeout_seconds),
                );
            }
        };

        let stdout_tail = stdout_task.await.unwrap_or_default();
        let stderr_tail = stderr_task.await.unwrap_or_default();
        let artifacts = json!({
            "exit_code": status.code(),
            "stdout_tail": stdout_tail,
            "stderr_tail": stderr_tail,
        });

        if status.success() {
            info!("执行成功: run={}", assignment.run_id);
            let mut submission = ResultSubmission::success();
            submission.artifacts = Some(artifacts);
            submission
        } else {
            warn!("执行失败: run={} 状态={}", assignment.run_id, status);
            let description = stderr_tail
                .last()
                .cloned()
                .unwrap_or_else(|| format!("command exited with {status}"));
            let mut submission = ResultSubmission::failure("command-failed", &description);
            submission.artifacts = Some(artifacts);
            submission
        }
    }
}

/// 逐行读取输出，只保留末尾若干行
async fn read_tail<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<String> {
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut tail = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == OUTPUT_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use conductor_core::models::CandidateDescriptor;

    fn assignment(command: &str, refresh: bool) -> AssignmentPayload {
        AssignmentPayload {
            run_id: "run-1".to_string(),
            lease_id: "lease-1".to_string(),
            candidate: CandidateDescriptor {
                campaign: "lintian-fixes".to_string(),
                target: "example.org/repo".to_string(),
                command: command.to_string(),
                refresh,
                attempt: 0,
            },
            expiry: Utc::now() + Duration::seconds(300),
        }
    }

    #[tokio::test]
    async fn test_successful_command_reports_success() {
        let executor = ShellExecutor::new(30);
        let report = executor.execute(&assignment("echo hello", false)).await;

        assert_eq!(report.code, "success");
        let artifacts = report.artifacts.unwrap();
        assert_eq!(artifacts["exit_code"], 0);
        assert_eq!(artifacts["stdout_tail"][0], "hello");
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr_and_exit_code() {
        let executor = ShellExecutor::new(30);
        let report = executor
            .execute(&assignment("echo boom >&2; exit 3", false))
            .await;

        assert_eq!(report.code, "command-failed");
        assert_eq!(report.description.as_deref(), Some("boom"));
        assert_eq!(report.artifacts.unwrap()["exit_code"], 3);
    }

    #[tokio::test]
    async fn test_timeout_reports_worker_timeout() {
        let executor = ShellExecutor::new(1);
        let report = executor.execute(&assignment("sleep 30", false)).await;

        assert_eq!(report.code, "worker-timeout");
        assert!(report.description.unwrap().contains("1s"));
    }

    #[tokio::test]
    async fn test_run_context_exported_via_environment() {
        let executor = ShellExecutor::new(30);
        let report = executor
            .execute(&assignment(
                r#"test "$CONDUCTOR_CAMPAIGN" = lintian-fixes && test "$CONDUCTOR_REFRESH" = 1"#,
                true,
            ))
            .await;
        assert_eq!(report.code, "success");
    }

    #[tokio::test]
    async fn test_command_runs_in_isolated_workdir() {
        let executor = ShellExecutor::new(30);
        let report = executor.execute(&assignment("pwd", false)).await;

        let artifacts = report.artifacts.unwrap();
        let workdir = artifacts["stdout_tail"][0].as_str().unwrap();
        let current = std::env::current_dir().unwrap();
        assert_ne!(workdir, current.to_string_lossy());
    }
}
