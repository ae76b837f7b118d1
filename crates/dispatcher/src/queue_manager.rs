//! 候选项扫描入队
//!
//! 发现流程只负责写入候选项；这里的扫描循环周期性地把活跃、
//! 未卡住、尚无队列条目的候选项转成排队运行，使新候选项无需
//! 外部调用即可进入调度。

use std::sync::Arc;

use tracing::{debug, error, info};

use conductor_core::{
    models::{Candidate, QueuedRun},
    traits::{CandidateRepository, QueueRepository},
    ConductorError, ConductorResult,
};
use conductor_infrastructure::MetricsCollector;

pub struct QueueManager {
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub queue_repo: Arc<dyn QueueRepository>,
    pub metrics: Arc<MetricsCollector>,
    scan_batch: i64,
}

impl QueueManager {
    pub fn new(
        candidate_repo: Arc<dyn CandidateRepository>,
        queue_repo: Arc<dyn QueueRepository>,
        metrics: Arc<MetricsCollector>,
        scan_batch: i64,
    ) -> Self {
        Self {
            candidate_repo,
            queue_repo,
            metrics,
            scan_batch,
        }
    }

    /// 扫一轮：把尚未排队的候选项放入队列
    ///
    /// 单个候选项入队失败只记录日志，不中断本轮扫描。
    pub async fn scan_and_enqueue(&self) -> ConductorResult<usize> {
        debug!("开始扫描未入队候选项");
        let candidates = self.candidate_repo.list_unqueued(self.scan_batch).await?;
        let mut enqueued = 0usize;

        for candidate in candidates {
            match self
                .enqueue_candidate(&candidate, candidate.priority, false)
                .await
            {
                Ok(_) => enqueued += 1,
                Err(e) => error!(
                    "候选项入队失败: {}/{}: {}",
                    candidate.campaign, candidate.target, e
                ),
            }
        }

        if enqueued > 0 {
            info!("本轮扫描入队 {} 个候选项", enqueued);
        }

        let pending = self.queue_repo.pending_count().await?;
        self.metrics.update_queue_depth(pending as f64);

        Ok(enqueued)
    }

    /// 把候选项入队
    ///
    /// 入队是以候选项为键的upsert：已有待分配条目时刷新优先级与
    /// 生效时间，已分配条目保持不变。
    pub async fn enqueue_candidate(
        &self,
        candidate: &Candidate,
        priority: i32,
        refresh: bool,
    ) -> ConductorResult<QueuedRun> {
        let mut entry = QueuedRun::new(candidate, priority);
        entry.refresh = refresh;

        let queued = self.queue_repo.enqueue(&entry).await?;
        debug!(
            "候选项已入队: {}/{} 优先级={} 条目={}",
            candidate.campaign, candidate.target, priority, queued.id
        );
        Ok(queued)
    }

    /// 按 (活动, 目标) 键入队，运维手动触发用
    pub async fn enqueue_by_key(
        &self,
        campaign: &str,
        target: &str,
        priority: Option<i32>,
        refresh: bool,
    ) -> ConductorResult<QueuedRun> {
        let candidate = self
            .candidate_repo
            .get_by_key(campaign, target)
            .await?
            .ok_or_else(|| ConductorError::CandidateNotFound {
                campaign: campaign.to_string(),
                target: target.to_string(),
            })?;

        let effective_priority = priority.unwrap_or(candidate.priority);
        self.enqueue_candidate(&candidate, effective_priority, refresh)
            .await
    }

    /// 当前待分配条目数
    pub async fn pending_depth(&self) -> ConductorResult<i64> {
        self.queue_repo.pending_count().await
    }
}
