//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, Duration, Utc};
use conductor_core::models::{
    Candidate, Lease, LeaseState, Proposal, ProposalStatus, PublishMode, QueuedRun,
    QueuedRunStatus, Run, RunOutcome,
};

/// Builder for creating test Candidate entities
pub struct CandidateBuilder {
    candidate: Candidate,
}

impl CandidateBuilder {
    pub fn new() -> Self {
        Self {
            candidate: Candidate {
                id: 1,
                campaign: "test-campaign".to_string(),
                target: "example.org/test-repo".to_string(),
                command: "test-command".to_string(),
                priority: 0,
                publish_mode: PublishMode::Propose,
                required_capabilities: vec![],
                last_attempt_at: None,
                stuck: false,
                stuck_reason: None,
                stuck_at: None,
                publish_attempts: 0,
                next_publish_at: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.candidate.id = id;
        self
    }

    pub fn with_campaign(mut self, campaign: &str) -> Self {
        self.candidate.campaign = campaign.to_string();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.candidate.target = target.to_string();
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.candidate.command = command.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.candidate.priority = priority;
        self
    }

    pub fn with_publish_mode(mut self, publish_mode: PublishMode) -> Self {
        self.candidate.publish_mode = publish_mode;
        self
    }

    pub fn with_required_capabilities(mut self, capabilities: Vec<&str>) -> Self {
        self.candidate.required_capabilities =
            capabilities.into_iter().map(String::from).collect();
        self
    }

    pub fn with_publish_attempts(mut self, attempts: i32) -> Self {
        self.candidate.publish_attempts = attempts;
        self
    }

    pub fn with_next_publish_at(mut self, next_publish_at: DateTime<Utc>) -> Self {
        self.candidate.next_publish_at = Some(next_publish_at);
        self
    }

    pub fn stuck(mut self, reason: &str) -> Self {
        let now = Utc::now();
        self.candidate.stuck = true;
        self.candidate.stuck_reason = Some(reason.to_string());
        self.candidate.stuck_at = Some(now);
        self
    }

    pub fn build(self) -> Candidate {
        self.candidate
    }
}

impl Default for CandidateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test QueuedRun entities
pub struct QueuedRunBuilder {
    queued_run: QueuedRun,
}

impl QueuedRunBuilder {
    pub fn new() -> Self {
        Self {
            queued_run: QueuedRun {
                id: 1,
                candidate_id: 1,
                campaign: "test-campaign".to_string(),
                target: "example.org/test-repo".to_string(),
                priority: 0,
                eligible_at: Utc::now(),
                attempt_count: 0,
                refresh: false,
                status: QueuedRunStatus::Pending,
                enqueued_at: Utc::now(),
            },
        }
    }

    /// Copy identity fields from a candidate
    pub fn for_candidate(mut self, candidate: &Candidate) -> Self {
        self.queued_run.candidate_id = candidate.id;
        self.queued_run.campaign = candidate.campaign.clone();
        self.queued_run.target = candidate.target.clone();
        self.queued_run.priority = candidate.priority;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.queued_run.id = id;
        self
    }

    pub fn with_candidate_id(mut self, candidate_id: i64) -> Self {
        self.queued_run.candidate_id = candidate_id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.queued_run.priority = priority;
        self
    }

    pub fn with_eligible_at(mut self, eligible_at: DateTime<Utc>) -> Self {
        self.queued_run.eligible_at = eligible_at;
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: i32) -> Self {
        self.queued_run.attempt_count = attempt_count;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.queued_run.refresh = true;
        self
    }

    pub fn assigned(mut self) -> Self {
        self.queued_run.status = QueuedRunStatus::Assigned;
        self
    }

    pub fn build(self) -> QueuedRun {
        self.queued_run
    }
}

impl Default for QueuedRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Run entities
pub struct RunBuilder {
    run: Run,
}

impl RunBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            run: Run {
                id: "test-run-1".to_string(),
                candidate_id: 1,
                campaign: "test-campaign".to_string(),
                target: "example.org/test-repo".to_string(),
                worker_id: Some("test-worker-1".to_string()),
                attempt: 1,
                started_at: now,
                finished_at: None,
                outcome: None,
                code: None,
                description: None,
                artifacts: serde_json::Value::Null,
                log_ref: None,
                created_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.run.id = id.to_string();
        self
    }

    pub fn with_candidate_id(mut self, candidate_id: i64) -> Self {
        self.run.candidate_id = candidate_id;
        self
    }

    pub fn with_campaign(mut self, campaign: &str) -> Self {
        self.run.campaign = campaign.to_string();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.run.target = target.to_string();
        self
    }

    pub fn with_worker_id(mut self, worker_id: &str) -> Self {
        self.run.worker_id = Some(worker_id.to_string());
        self
    }

    pub fn with_attempt(mut self, attempt: i32) -> Self {
        self.run.attempt = attempt;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.run.started_at = started_at;
        self
    }

    pub fn with_artifacts(mut self, artifacts: serde_json::Value) -> Self {
        self.run.artifacts = artifacts;
        self
    }

    pub fn successful(mut self) -> Self {
        let now = Utc::now();
        self.run.outcome = Some(RunOutcome::Success);
        self.run.code = Some("success".to_string());
        self.run.finished_at = Some(now);
        self
    }

    pub fn failed(mut self, code: &str) -> Self {
        let now = Utc::now();
        self.run.outcome = Some(RunOutcome::PermanentFailure);
        self.run.code = Some(code.to_string());
        self.run.description = Some("Test failure".to_string());
        self.run.finished_at = Some(now);
        self
    }

    pub fn transient_failure(mut self, code: &str) -> Self {
        let now = Utc::now();
        self.run.outcome = Some(RunOutcome::TransientFailure);
        self.run.code = Some(code.to_string());
        self.run.finished_at = Some(now);
        self
    }

    pub fn build(self) -> Run {
        self.run
    }
}

impl Default for RunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Lease entities
pub struct LeaseBuilder {
    lease: Lease,
}

impl LeaseBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            lease: Lease {
                id: "test-lease-1".to_string(),
                queued_run_id: 1,
                run_id: "test-run-1".to_string(),
                candidate_id: 1,
                worker_id: "test-worker-1".to_string(),
                target: "example.org/test-repo".to_string(),
                state: LeaseState::Active,
                acquired_at: now,
                renewed_at: now,
                expires_at: now + Duration::seconds(300),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.lease.id = id.to_string();
        self
    }

    pub fn with_queued_run_id(mut self, queued_run_id: i64) -> Self {
        self.lease.queued_run_id = queued_run_id;
        self
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.lease.run_id = run_id.to_string();
        self
    }

    pub fn with_worker_id(mut self, worker_id: &str) -> Self {
        self.lease.worker_id = worker_id.to_string();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.lease.target = target.to_string();
        self
    }

    pub fn with_state(mut self, state: LeaseState) -> Self {
        self.lease.state = state;
        self
    }

    /// Active lease whose TTL already elapsed, ready for reclaim
    pub fn expired(mut self) -> Self {
        let now = Utc::now();
        self.lease.acquired_at = now - Duration::seconds(600);
        self.lease.renewed_at = now - Duration::seconds(600);
        self.lease.expires_at = now - Duration::seconds(300);
        self
    }

    pub fn released(mut self) -> Self {
        self.lease.state = LeaseState::Released;
        self
    }

    pub fn build(self) -> Lease {
        self.lease
    }
}

impl Default for LeaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Proposal entities
pub struct ProposalBuilder {
    proposal: Proposal,
}

impl ProposalBuilder {
    pub fn new() -> Self {
        Self {
            proposal: Proposal {
                id: 1,
                candidate_id: 1,
                campaign: "test-campaign".to_string(),
                target: "example.org/test-repo".to_string(),
                run_id: "test-run-1".to_string(),
                mode: PublishMode::Propose,
                status: ProposalStatus::Open,
                url: "https://example.org/test-repo/merge_requests/1".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_checked_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.proposal.id = id;
        self
    }

    pub fn with_candidate_id(mut self, candidate_id: i64) -> Self {
        self.proposal.candidate_id = candidate_id;
        self
    }

    pub fn with_campaign(mut self, campaign: &str) -> Self {
        self.proposal.campaign = campaign.to_string();
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.proposal.target = target.to_string();
        self
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.proposal.run_id = run_id.to_string();
        self
    }

    pub fn with_mode(mut self, mode: PublishMode) -> Self {
        self.proposal.mode = mode;
        self
    }

    pub fn with_status(mut self, status: ProposalStatus) -> Self {
        self.proposal.status = status;
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.proposal.url = url.to_string();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.proposal.created_at = created_at;
        self
    }

    pub fn with_last_checked_at(mut self, last_checked_at: DateTime<Utc>) -> Self {
        self.proposal.last_checked_at = Some(last_checked_at);
        self
    }

    pub fn merged(mut self) -> Self {
        self.proposal.status = ProposalStatus::Merged;
        self.proposal.updated_at = Utc::now();
        self
    }

    pub fn closed(mut self) -> Self {
        self.proposal.status = ProposalStatus::Closed;
        self.proposal.updated_at = Utc::now();
        self
    }

    pub fn build(self) -> Proposal {
        self.proposal
    }
}

impl Default for ProposalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_builder_defaults() {
        let candidate = CandidateBuilder::new().build();
        assert_eq!(candidate.campaign, "test-campaign");
        assert_eq!(candidate.publish_mode, PublishMode::Propose);
        assert!(!candidate.stuck);
    }

    #[test]
    fn test_queued_run_builder_for_candidate() {
        let candidate = CandidateBuilder::new()
            .with_id(42)
            .with_campaign("lintian-fixes")
            .with_priority(9)
            .build();
        let queued_run = QueuedRunBuilder::new().for_candidate(&candidate).build();
        assert_eq!(queued_run.candidate_id, 42);
        assert_eq!(queued_run.campaign, "lintian-fixes");
        assert_eq!(queued_run.priority, 9);
    }

    #[test]
    fn test_expired_lease_builder_produces_reclaimable_lease() {
        let lease = LeaseBuilder::new().expired().build();
        assert_eq!(lease.state, LeaseState::Active);
        assert!(lease.expires_at <= Utc::now());
    }

    #[test]
    fn test_run_builder_successful_shortcut() {
        let run = RunBuilder::new().successful().build();
        assert!(run.is_successful());
        assert!(run.finished_at.is_some());
    }
}
