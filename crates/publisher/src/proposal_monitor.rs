//! 提案状态监视
//!
//! 提案发布后归宿由外部论坛决定。监视循环定期核对开放提案在
//! 论坛侧的当前状态，把合并、关闭、拒绝回写到本地记录。被关闭
//! 的提案说明变更已过时或不被接受，对应候选项会带优先级加成
//! 重新入队并要求刷新重建；合并与拒绝只记录，不再重新排队。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument};

use conductor_core::{
    config::PublisherConfig,
    models::{Proposal, ProposalStatus, QueuedRun},
    traits::{CandidateRepository, ProposalRepository, PublishMechanism, QueueRepository},
    ConductorResult,
};
use conductor_infrastructure::MetricsCollector;

/// 刷新开放提案总数指标时的扫描上限
const OPEN_GAUGE_LIMIT: i64 = 10_000;

pub struct ProposalMonitor {
    pub proposal_repo: Arc<dyn ProposalRepository>,
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub queue_repo: Arc<dyn QueueRepository>,
    pub mechanism: Arc<dyn PublishMechanism>,
    pub metrics: Arc<MetricsCollector>,
    check_batch: i64,
    refresh_priority_boost: i32,
}

impl ProposalMonitor {
    pub fn new(
        proposal_repo: Arc<dyn ProposalRepository>,
        candidate_repo: Arc<dyn CandidateRepository>,
        queue_repo: Arc<dyn QueueRepository>,
        mechanism: Arc<dyn PublishMechanism>,
        metrics: Arc<MetricsCollector>,
        config: &PublisherConfig,
    ) -> Self {
        Self {
            proposal_repo,
            candidate_repo,
            queue_repo,
            mechanism,
            metrics,
            check_batch: config.proposal_check_batch,
            refresh_priority_boost: config.refresh_priority_boost,
        }
    }

    /// 核对一批开放提案，返回状态发生变更的数量
    ///
    /// 批次按最久未核对优先排序，单个提案的核对失败只记日志，
    /// 不中断其余提案的处理。
    #[instrument(skip(self))]
    pub async fn check_once(&self, now: DateTime<Utc>) -> ConductorResult<usize> {
        let open = self.proposal_repo.list_open(self.check_batch).await?;
        if open.is_empty() {
            self.metrics.update_open_proposals(0.0);
            return Ok(0);
        }

        let mut changed = 0;
        for proposal in open {
            match self.check_one(&proposal, now).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("核对提案状态失败: {}: {}", proposal.url, e);
                }
            }
        }

        let remaining = self.proposal_repo.list_open(OPEN_GAUGE_LIMIT).await?;
        self.metrics.update_open_proposals(remaining.len() as f64);

        if changed > 0 {
            info!("本轮核对发现 {} 个提案状态变更", changed);
        }
        Ok(changed)
    }

    async fn check_one(&self, proposal: &Proposal, now: DateTime<Utc>) -> ConductorResult<bool> {
        let status = self.mechanism.check_proposal(&proposal.url).await?;
        if status == proposal.status {
            self.proposal_repo.touch_checked(proposal.id, now).await?;
            return Ok(false);
        }

        self.proposal_repo
            .update_status(proposal.id, status, now)
            .await?;
        info!(
            "提案状态变更: {} {:?} -> {:?}",
            proposal.url, proposal.status, status
        );

        if status == ProposalStatus::Closed {
            self.requeue_refresh(proposal).await?;
        }
        Ok(true)
    }

    /// 为被关闭提案的候选项安排一次刷新运行
    async fn requeue_refresh(&self, proposal: &Proposal) -> ConductorResult<()> {
        let Some(candidate) = self
            .candidate_repo
            .get_by_id(proposal.candidate_id)
            .await?
        else {
            debug!("提案对应的候选项已不存在: {}", proposal.candidate_id);
            return Ok(());
        };
        if candidate.stuck {
            debug!(
                "候选项已卡住，不重新入队: {}/{}",
                candidate.campaign, candidate.target
            );
            return Ok(());
        }

        let mut entry = QueuedRun::new(
            &candidate,
            candidate.priority + self.refresh_priority_boost,
        );
        entry.refresh = true;
        self.queue_repo.enqueue(&entry).await?;
        info!(
            "提案被关闭，候选项重新入队刷新: {}/{} 优先级={}",
            candidate.campaign, candidate.target, entry.priority
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::models::QueuedRunStatus;
    use conductor_testing_utils::builders::{CandidateBuilder, ProposalBuilder};
    use conductor_testing_utils::mocks::{
        MockCandidateRepository, MockProposalRepository, MockPublishMechanism,
        MockQueueRepository,
    };

    const URL: &str = "https://salsa.debian.org/jelmer/dulwich/merge_requests/7";

    struct Fixture {
        proposals: MockProposalRepository,
        queue: MockQueueRepository,
        mechanism: MockPublishMechanism,
        monitor: ProposalMonitor,
    }

    fn monitor_fixture(candidate: conductor_core::models::Candidate) -> Fixture {
        let candidates = MockCandidateRepository::with_candidates(vec![candidate]);
        let proposals = MockProposalRepository::with_proposals(vec![ProposalBuilder::new()
            .with_id(1)
            .with_candidate_id(1)
            .with_campaign("lintian-fixes")
            .with_target("salsa.debian.org/jelmer/dulwich")
            .with_run_id("run-1")
            .with_url(URL)
            .build()]);
        let queue = MockQueueRepository::new();
        let mechanism = MockPublishMechanism::new();

        let config = PublisherConfig {
            enabled: true,
            bind_address: "127.0.0.1:0".to_string(),
            publish_gateway_url: "http://127.0.0.1:9914".to_string(),
            scan_interval_seconds: 60,
            batch_size: 50,
            max_publish_attempts: 6,
            proposal_check_interval_seconds: 60,
            proposal_check_batch: 50,
            refresh_priority_boost: 2,
            branch_prefix: "conductor".to_string(),
        };
        let monitor = ProposalMonitor::new(
            Arc::new(proposals.clone()),
            Arc::new(candidates.clone()),
            Arc::new(queue.clone()),
            Arc::new(mechanism.clone()),
            Arc::new(MetricsCollector::new().unwrap()),
            &config,
        );

        Fixture {
            proposals,
            queue,
            mechanism,
            monitor,
        }
    }

    fn test_candidate() -> conductor_core::models::Candidate {
        CandidateBuilder::new()
            .with_id(1)
            .with_campaign("lintian-fixes")
            .with_target("salsa.debian.org/jelmer/dulwich")
            .with_priority(3)
            .build()
    }

    #[tokio::test]
    async fn test_merged_proposal_is_recorded_without_requeue() {
        let fixture = monitor_fixture(test_candidate());
        fixture
            .mechanism
            .set_proposal_status(URL, ProposalStatus::Merged);

        let changed = fixture.monitor.check_once(Utc::now()).await.unwrap();
        assert_eq!(changed, 1);

        let proposal = &fixture.proposals.all_proposals()[0];
        assert_eq!(proposal.status, ProposalStatus::Merged);
        assert!(proposal.last_checked_at.is_some());
        assert_eq!(fixture.queue.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_proposal_requeues_refresh_with_boost() {
        let fixture = monitor_fixture(test_candidate());
        fixture
            .mechanism
            .set_proposal_status(URL, ProposalStatus::Closed);

        let changed = fixture.monitor.check_once(Utc::now()).await.unwrap();
        assert_eq!(changed, 1);

        let entries = fixture.queue.all_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].refresh);
        assert_eq!(entries[0].priority, 5);
        assert_eq!(entries[0].status, QueuedRunStatus::Pending);
        assert_eq!(entries[0].target, "salsa.debian.org/jelmer/dulwich");
    }

    #[tokio::test]
    async fn test_unchanged_proposal_only_touches_check_time() {
        let fixture = monitor_fixture(test_candidate());
        // 未脚本化的地址在论坛侧仍是开放状态

        let changed = fixture.monitor.check_once(Utc::now()).await.unwrap();
        assert_eq!(changed, 0);

        let proposal = &fixture.proposals.all_proposals()[0];
        assert_eq!(proposal.status, ProposalStatus::Open);
        assert!(proposal.last_checked_at.is_some());
        assert_eq!(fixture.mechanism.checked_urls(), vec![URL.to_string()]);
        assert_eq!(fixture.queue.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_proposal_is_recorded_without_requeue() {
        let fixture = monitor_fixture(test_candidate());
        fixture
            .mechanism
            .set_proposal_status(URL, ProposalStatus::Rejected);

        let changed = fixture.monitor.check_once(Utc::now()).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            fixture.proposals.all_proposals()[0].status,
            ProposalStatus::Rejected
        );
        assert_eq!(fixture.queue.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_stuck_candidate_is_not_requeued() {
        let fixture = monitor_fixture(
            CandidateBuilder::new()
                .with_id(1)
                .with_campaign("lintian-fixes")
                .with_target("salsa.debian.org/jelmer/dulwich")
                .stuck("max-run-attempts-exceeded")
                .build(),
        );
        fixture
            .mechanism
            .set_proposal_status(URL, ProposalStatus::Closed);

        let changed = fixture.monitor.check_once(Utc::now()).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            fixture.proposals.all_proposals()[0].status,
            ProposalStatus::Closed
        );
        assert_eq!(fixture.queue.entry_count(), 0);
    }
}
