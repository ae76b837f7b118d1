//! 发布状态机
//!
//! 概念状态 `unpublished → pending_publish → published →
//! (superseded | closed)` 均为推导态：`pending_publish` 由目标锁
//! 裁决，`published` 及其后续由提案行推导，数据库不存状态列。
//!
//! 一次发布决策在目标锁内完成限流核对、开放提案核对与外部发布
//! 调用，锁在所有路径上释放。争用与限流是推迟信号，不计入失败；
//! 外部发布失败走有界退避，预算耗尽后候选项进入 `stuck-publish`。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use conductor_core::{
    backoff,
    config::{BackoffConfig, PublisherConfig},
    models::{Candidate, Proposal, PublishMode, Run},
    traits::{
        CandidateRepository, DeferredReason, LockService, ProposalRepository, PublishMechanism,
        PublishOutcome, PublishRequest, PublishService, RunRepository,
    },
    ConductorError, ConductorResult,
};
use conductor_infrastructure::MetricsCollector;

use crate::rate_limiter::{RateLimitDecision, RateLimiter};

/// 发布重试预算耗尽后写入候选项的卡住原因
pub const PUBLISH_STUCK_REASON: &str = "stuck-publish";

pub struct PublishStateMachine {
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub run_repo: Arc<dyn RunRepository>,
    pub proposal_repo: Arc<dyn ProposalRepository>,
    pub lock_service: Arc<dyn LockService>,
    pub mechanism: Arc<dyn PublishMechanism>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub metrics: Arc<MetricsCollector>,
    backoff: BackoffConfig,
    max_publish_attempts: i32,
    lock_ttl_seconds: u64,
    branch_prefix: String,
    batch_size: i64,
}

impl PublishStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        candidate_repo: Arc<dyn CandidateRepository>,
        run_repo: Arc<dyn RunRepository>,
        proposal_repo: Arc<dyn ProposalRepository>,
        lock_service: Arc<dyn LockService>,
        mechanism: Arc<dyn PublishMechanism>,
        rate_limiter: Arc<dyn RateLimiter>,
        metrics: Arc<MetricsCollector>,
        config: &PublisherConfig,
        backoff: BackoffConfig,
        lock_ttl_seconds: u64,
    ) -> Self {
        Self {
            candidate_repo,
            run_repo,
            proposal_repo,
            lock_service,
            mechanism,
            rate_limiter,
            metrics,
            backoff,
            max_publish_attempts: config.max_publish_attempts,
            lock_ttl_seconds,
            branch_prefix: config.branch_prefix.clone(),
            batch_size: config.batch_size,
        }
    }

    /// 对一对（候选项、成功运行）做一次完整的发布决策
    pub async fn publish_run(
        &self,
        candidate: &Candidate,
        run: &Run,
    ) -> ConductorResult<PublishOutcome> {
        let now = Utc::now();

        if candidate.stuck {
            return Ok(PublishOutcome::Skipped("candidate is stuck".to_string()));
        }
        if !candidate.publish_mode.publishes() {
            return Ok(PublishOutcome::Skipped(
                "publish mode does not publish".to_string(),
            ));
        }
        if let Some(next_at) = candidate.next_publish_at {
            if next_at > now {
                return Ok(PublishOutcome::Skipped(format!(
                    "publish backoff in effect until {next_at}"
                )));
            }
        }

        let lock_key = format!("publish:{}", candidate.target);
        let handle = match self
            .lock_service
            .acquire(&lock_key, self.lock_ttl_seconds)
            .await
        {
            Ok(handle) => handle,
            Err(ConductorError::LockContended { key }) => {
                self.metrics.record_publish_deferred("lock-contended");
                debug!("发布锁争用: {}", key);
                return Ok(PublishOutcome::Deferred(DeferredReason::LockContended {
                    key,
                }));
            }
            Err(e) => return Err(e),
        };

        let outcome = self.publish_locked(candidate, run, now).await;
        if let Err(e) = self.lock_service.release(&handle).await {
            warn!("释放发布锁失败: {}: {}", handle.key, e);
        }
        outcome
    }

    /// 持锁阶段：限流核对、提案核对、外部发布与记录
    async fn publish_locked(
        &self,
        candidate: &Candidate,
        run: &Run,
        now: DateTime<Utc>,
    ) -> ConductorResult<PublishOutcome> {
        // 发布决策只针对最新成功运行；扫描批次在途中可能已被更新
        let newest = self
            .run_repo
            .latest_success_for_candidate(candidate.id)
            .await?;
        match &newest {
            Some(n) if n.id != run.id => {
                return Ok(PublishOutcome::Skipped(format!(
                    "superseded by newer successful run {}",
                    n.id
                )))
            }
            None => return Ok(PublishOutcome::Skipped("no successful run".to_string())),
            _ => {}
        }

        let host = candidate.target_class();
        if let RateLimitDecision::Limited { bucket } = self.rate_limiter.check(host, now).await? {
            self.metrics.record_publish_deferred("rate-limited");
            debug!(
                "发布限流: {}/{} 桶={}",
                candidate.campaign, candidate.target, bucket
            );
            return Ok(PublishOutcome::Deferred(DeferredReason::RateLimited {
                bucket,
            }));
        }

        let existing = self
            .proposal_repo
            .get_open_for(&candidate.campaign, &candidate.target)
            .await?;
        if let Some(open) = &existing {
            if open.run_id == run.id {
                return Ok(PublishOutcome::Skipped(format!(
                    "proposal already current: {}",
                    open.url
                )));
            }
        }

        let first_mode = match candidate.publish_mode {
            PublishMode::AttemptPush => PublishMode::Push,
            mode => mode,
        };
        let request = PublishRequest {
            campaign: candidate.campaign.clone(),
            target: candidate.target.clone(),
            run_id: run.id.clone(),
            mode: first_mode,
            branch_name: format!("{}/{}", self.branch_prefix, candidate.campaign),
            existing_proposal_url: existing.as_ref().map(|p| p.url.clone()),
            description: run.description.clone(),
        };

        let receipt = match self.mechanism.publish(&request).await {
            Ok(receipt) => receipt,
            Err(ConductorError::Publish { code, .. })
                if code == "permission-denied"
                    && candidate.publish_mode == PublishMode::AttemptPush =>
            {
                info!(
                    "推送被拒，降级为提案: {}/{}",
                    candidate.campaign, candidate.target
                );
                let fallback = PublishRequest {
                    mode: PublishMode::Propose,
                    ..request
                };
                match self.mechanism.publish(&fallback).await {
                    Ok(receipt) => receipt,
                    Err(ConductorError::Publish { code, description }) => {
                        return self.record_failure(candidate, code, description, now).await
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(ConductorError::Publish { code, description }) => {
                return self.record_failure(candidate, code, description, now).await
            }
            Err(e) => return Err(e),
        };

        let proposal = Proposal::new(
            candidate.id,
            &candidate.campaign,
            &candidate.target,
            &run.id,
            receipt.mode,
            &receipt.url,
            receipt.status,
        );
        let recorded = match existing {
            Some(open) => self.proposal_repo.supersede(open.id, &proposal).await?,
            None => self.proposal_repo.create(&proposal).await?,
        };
        self.candidate_repo
            .reset_publish_backoff(candidate.id)
            .await?;
        self.metrics
            .record_proposal_published(&candidate.campaign, mode_label(recorded.mode));

        info!(
            "发布完成: {}/{} mode={:?} url={}",
            candidate.campaign, candidate.target, recorded.mode, recorded.url
        );
        Ok(PublishOutcome::Published(recorded))
    }

    /// 记录一次外部发布失败，推进退避或标记卡住
    async fn record_failure(
        &self,
        candidate: &Candidate,
        code: String,
        description: String,
        now: DateTime<Utc>,
    ) -> ConductorResult<PublishOutcome> {
        let attempts = candidate.publish_attempts + 1;
        if attempts >= self.max_publish_attempts {
            self.candidate_repo
                .mark_stuck(candidate.id, PUBLISH_STUCK_REASON, now)
                .await?;
            warn!(
                "发布重试预算耗尽: {}/{} 尝试={}",
                candidate.campaign, candidate.target, attempts
            );
        } else {
            let next_at = backoff::next_eligible_at(&self.backoff, attempts, now);
            self.candidate_repo
                .set_publish_backoff(candidate.id, attempts, next_at)
                .await?;
            info!(
                "发布失败进入退避: {}/{} 尝试={} 下次={}",
                candidate.campaign, candidate.target, attempts, next_at
            );
        }
        self.metrics
            .record_publish_failure(&candidate.campaign, &code);
        Ok(PublishOutcome::Failed { code, description })
    }
}

fn mode_label(mode: PublishMode) -> &'static str {
    match mode {
        PublishMode::Push | PublishMode::AttemptPush => "push",
        PublishMode::Propose => "propose",
        PublishMode::Attach => "attach",
        PublishMode::Skip | PublishMode::BuildOnly => "none",
    }
}

#[async_trait]
impl PublishService for PublishStateMachine {
    #[instrument(skip(self))]
    async fn consider_publish(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<PublishOutcome> {
        let candidate = self
            .candidate_repo
            .get_by_key(campaign, target)
            .await?
            .ok_or_else(|| ConductorError::CandidateNotFound {
                campaign: campaign.to_string(),
                target: target.to_string(),
            })?;

        let Some(run) = self
            .run_repo
            .latest_success_for_candidate(candidate.id)
            .await?
        else {
            return Ok(PublishOutcome::Skipped("no successful run".to_string()));
        };

        self.publish_run(&candidate, &run).await
    }

    #[instrument(skip(self))]
    async fn scan_and_publish(&self) -> ConductorResult<Vec<PublishOutcome>> {
        let now = Utc::now();
        let ready = self.run_repo.publish_ready(now, self.batch_size).await?;
        if ready.is_empty() {
            return Ok(Vec::new());
        }

        debug!("本轮发布扫描: {} 个就绪运行", ready.len());
        let mut outcomes = Vec::with_capacity(ready.len());
        for item in ready {
            match self.publish_run(&item.candidate, &item.run).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(
                        "发布决策失败: {}/{}: {}",
                        item.candidate.campaign, item.candidate.target, e
                    );
                }
            }
        }
        Ok(outcomes)
    }
}
