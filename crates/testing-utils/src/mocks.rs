//! Mock implementations for all repository and service traits
//!
//! This module provides in-memory mock implementations that can be used
//! for unit testing without requiring actual database connections or
//! external services. The mocks honor the concurrency-visible semantics
//! of the real repositories (lease races, finalize-once, upsert enqueue)
//! so service-level tests exercise realistic control flow.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conductor_core::models::{
    Candidate, Lease, LeaseState, Proposal, ProposalStatus, PublishMode, QueuedRun,
    QueuedRunStatus, Run, RunOutcome,
};
use conductor_core::traits::{
    Assignment, CandidateRepository, LockHandle, LockService, ProposalRepository,
    PublishMechanism, PublishReceipt, PublishRequest, PublishableRun, QueueRepository,
    RunRepository,
};
use conductor_core::{ConductorError, ConductorResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Mock implementation of CandidateRepository for testing
#[derive(Debug, Clone)]
pub struct MockCandidateRepository {
    candidates: Arc<Mutex<HashMap<i64, Candidate>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockCandidateRepository {
    pub fn new() -> Self {
        Self {
            candidates: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        let mut map = HashMap::new();
        let mut max_id = 0;

        for candidate in candidates {
            if candidate.id > max_id {
                max_id = candidate.id;
            }
            map.insert(candidate.id, candidate);
        }

        Self {
            candidates: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.candidates.lock().unwrap().len()
    }

    pub fn all_candidates(&self) -> Vec<Candidate> {
        self.candidates.lock().unwrap().values().cloned().collect()
    }
}

impl Default for MockCandidateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandidateRepository for MockCandidateRepository {
    async fn upsert(&self, candidate: &Candidate) -> ConductorResult<Candidate> {
        let mut candidates = self.candidates.lock().unwrap();

        let existing_id = candidates
            .values()
            .find(|c| c.campaign == candidate.campaign && c.target == candidate.target)
            .map(|c| c.id);

        if let Some(id) = existing_id {
            let current = candidates.get_mut(&id).unwrap();
            current.command = candidate.command.clone();
            current.priority = candidate.priority;
            current.publish_mode = candidate.publish_mode;
            current.required_capabilities = candidate.required_capabilities.clone();
            current.updated_at = candidate.updated_at;
            return Ok(current.clone());
        }

        let mut next_id = self.next_id.lock().unwrap();
        let mut created = candidate.clone();
        created.id = *next_id;
        *next_id += 1;
        candidates.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Candidate>> {
        Ok(self.candidates.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_key(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<Option<Candidate>> {
        Ok(self
            .candidates
            .lock()
            .unwrap()
            .values()
            .find(|c| c.campaign == campaign && c.target == target)
            .cloned())
    }

    async fn list_unqueued(&self, limit: i64) -> ConductorResult<Vec<Candidate>> {
        let mut eligible: Vec<Candidate> = self
            .candidates
            .lock()
            .unwrap()
            .values()
            .filter(|c| !c.stuck)
            .cloned()
            .collect();
        eligible.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        eligible.truncate(limit as usize);
        Ok(eligible)
    }

    async fn touch_attempt(&self, id: i64, at: DateTime<Utc>) -> ConductorResult<()> {
        let mut candidates = self.candidates.lock().unwrap();
        let candidate = candidates
            .get_mut(&id)
            .ok_or_else(|| ConductorError::DatabaseOperation(format!("候选项不存在: id={id}")))?;
        candidate.last_attempt_at = Some(at);
        candidate.updated_at = at;
        Ok(())
    }

    async fn mark_stuck(&self, id: i64, reason: &str, at: DateTime<Utc>) -> ConductorResult<()> {
        let mut candidates = self.candidates.lock().unwrap();
        let candidate = candidates
            .get_mut(&id)
            .ok_or_else(|| ConductorError::DatabaseOperation(format!("候选项不存在: id={id}")))?;
        candidate.stuck = true;
        candidate.stuck_reason = Some(reason.to_string());
        candidate.stuck_at = Some(at);
        candidate.updated_at = at;
        Ok(())
    }

    async fn clear_stuck(&self, id: i64) -> ConductorResult<()> {
        let mut candidates = self.candidates.lock().unwrap();
        let candidate = candidates
            .get_mut(&id)
            .ok_or_else(|| ConductorError::DatabaseOperation(format!("候选项不存在: id={id}")))?;
        candidate.stuck = false;
        candidate.stuck_reason = None;
        candidate.stuck_at = None;
        Ok(())
    }

    async fn set_publish_backoff(
        &self,
        id: i64,
        attempts: i32,
        next_at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let mut candidates = self.candidates.lock().unwrap();
        let candidate = candidates
            .get_mut(&id)
            .ok_or_else(|| ConductorError::DatabaseOperation(format!("候选项不存在: id={id}")))?;
        candidate.publish_attempts = attempts;
        candidate.next_publish_at = Some(next_at);
        Ok(())
    }

    async fn reset_publish_backoff(&self, id: i64) -> ConductorResult<()> {
        let mut candidates = self.candidates.lock().unwrap();
        let candidate = candidates
            .get_mut(&id)
            .ok_or_else(|| ConductorError::DatabaseOperation(format!("候选项不存在: id={id}")))?;
        candidate.publish_attempts = 0;
        candidate.next_publish_at = None;
        Ok(())
    }
}

/// Mock implementation of RunRepository for testing
///
/// `publish_ready` returns entries seeded through [`push_publishable`]
/// rather than deriving them from stored runs; scan tests arrange their
/// own batches.
///
/// [`push_publishable`]: MockRunRepository::push_publishable
#[derive(Debug, Clone)]
pub struct MockRunRepository {
    runs: Arc<Mutex<HashMap<String, Run>>>,
    publishable: Arc<Mutex<Vec<PublishableRun>>>,
}

impl MockRunRepository {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            publishable: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_runs(runs: Vec<Run>) -> Self {
        let map = runs.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            runs: Arc::new(Mutex::new(map)),
            publishable: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_run(&self, run: Run) {
        self.runs.lock().unwrap().insert(run.id.clone(), run);
    }

    pub fn all_runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn push_publishable(&self, item: PublishableRun) {
        self.publishable.lock().unwrap().push(item);
    }

    pub fn clear_publishable(&self) {
        self.publishable.lock().unwrap().clear();
    }
}

impl Default for MockRunRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunRepository for MockRunRepository {
    async fn get_by_id(&self, run_id: &str) -> ConductorResult<Option<Run>> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        run_id: &str,
        outcome: RunOutcome,
        code: &str,
        description: Option<&str>,
        artifacts: &serde_json::Value,
        log_ref: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> ConductorResult<Run> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(run_id).ok_or_else(|| ConductorError::RunNotFound {
            id: run_id.to_string(),
        })?;

        if run.outcome.is_some() {
            return Err(ConductorError::Internal(format!(
                "运行已终结，拒绝重复写入: {run_id}"
            )));
        }

        run.outcome = Some(outcome);
        run.code = Some(code.to_string());
        run.description = description.map(|d| d.to_string());
        run.artifacts = artifacts.clone();
        run.log_ref = log_ref.map(|l| l.to_string());
        run.finished_at = Some(finished_at);
        Ok(run.clone())
    }

    async fn list_for_candidate(
        &self,
        candidate_id: i64,
        limit: i64,
    ) -> ConductorResult<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.candidate_id == candidate_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn latest_success_for_candidate(
        &self,
        candidate_id: i64,
    ) -> ConductorResult<Option<Run>> {
        let runs = self.runs.lock().unwrap();
        let mut successes: Vec<&Run> = runs
            .values()
            .filter(|r| r.candidate_id == candidate_id && r.is_successful())
            .collect();
        successes.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(successes.first().map(|r| (*r).clone()))
    }

    async fn publish_ready(
        &self,
        _now: DateTime<Utc>,
        limit: i64,
    ) -> ConductorResult<Vec<PublishableRun>> {
        let publishable = self.publishable.lock().unwrap();
        Ok(publishable.iter().take(limit as usize).cloned().collect())
    }
}

/// Mock implementation of QueueRepository for testing
///
/// Link a [`MockRunRepository`] to make transactional side effects
/// visible: `assign_next` records the created run there and
/// `reclaim_lease` finalizes the orphaned run there.
#[derive(Debug, Clone)]
pub struct MockQueueRepository {
    entries: Arc<Mutex<HashMap<i64, QueuedRun>>>,
    leases: Arc<Mutex<HashMap<String, Lease>>>,
    candidates: Arc<Mutex<HashMap<i64, Candidate>>>,
    next_id: Arc<Mutex<i64>>,
    run_repository: Option<MockRunRepository>,
}

impl MockQueueRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            leases: Arc::new(Mutex::new(HashMap::new())),
            candidates: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            run_repository: None,
        }
    }

    pub fn with_run_repository(runs: MockRunRepository) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            leases: Arc::new(Mutex::new(HashMap::new())),
            candidates: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            run_repository: Some(runs),
        }
    }

    /// Seed the candidate joined into assignments; without it
    /// `assign_next` synthesizes one with no capability requirements.
    pub fn add_candidate(&self, candidate: Candidate) {
        self.candidates.lock().unwrap().insert(candidate.id, candidate);
    }

    pub fn add_lease(&self, lease: Lease) {
        self.leases.lock().unwrap().insert(lease.id.clone(), lease);
    }

    pub fn all_entries(&self) -> Vec<QueuedRun> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn all_leases(&self) -> Vec<Lease> {
        self.leases.lock().unwrap().values().cloned().collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for MockQueueRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueRepository for MockQueueRepository {
    async fn enqueue(&self, entry: &QueuedRun) -> ConductorResult<QueuedRun> {
        let mut entries = self.entries.lock().unwrap();

        let existing_id = entries
            .values()
            .find(|e| e.candidate_id == entry.candidate_id)
            .map(|e| e.id);

        if let Some(id) = existing_id {
            let current = entries.get_mut(&id).unwrap();
            if current.status == QueuedRunStatus::Pending {
                current.priority = entry.priority;
                current.eligible_at = entry.eligible_at;
                current.refresh = entry.refresh;
            }
            return Ok(current.clone());
        }

        let mut next_id = self.next_id.lock().unwrap();
        let mut created = entry.clone();
        created.id = *next_id;
        *next_id += 1;
        entries.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_candidate(&self, candidate_id: i64) -> ConductorResult<Option<QueuedRun>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .find(|e| e.candidate_id == candidate_id)
            .cloned())
    }

    async fn assign_next(
        &self,
        worker_id: &str,
        capabilities: &[String],
        lease_ttl_seconds: i64,
        scan_limit: i64,
        now: DateTime<Utc>,
    ) -> ConductorResult<Option<Assignment>> {
        let mut leases = self.leases.lock().unwrap();
        let mut entries = self.entries.lock().unwrap();

        let mut eligible: Vec<QueuedRun> = entries
            .values()
            .filter(|e| e.is_eligible(now))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.eligible_at.cmp(&b.eligible_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        eligible.truncate(scan_limit as usize);

        for queued_run in eligible {
            if leases
                .values()
                .any(|l| l.target == queued_run.target && l.is_live(now))
            {
                continue;
            }

            let candidate = self
                .candidates
                .lock()
                .unwrap()
                .get(&queued_run.candidate_id)
                .cloned()
                .unwrap_or_else(|| {
                    let mut synthesized = Candidate::new(
                        &queued_run.campaign,
                        &queued_run.target,
                        "mock-command",
                    );
                    synthesized.id = queued_run.candidate_id;
                    synthesized.priority = queued_run.priority;
                    synthesized
                });
            if !candidate
                .required_capabilities
                .iter()
                .all(|cap| capabilities.contains(cap))
            {
                continue;
            }

            let run = Run::new(
                candidate.id,
                &candidate.campaign,
                &candidate.target,
                worker_id,
                queued_run.attempt_count + 1,
            );
            if let Some(runs) = &self.run_repository {
                runs.add_run(run.clone());
            }

            let lease = Lease::new(
                queued_run.id,
                candidate.id,
                &run.id,
                worker_id,
                &candidate.target,
                lease_ttl_seconds,
            );
            leases.insert(lease.id.clone(), lease.clone());

            let entry = entries.get_mut(&queued_run.id).unwrap();
            entry.status = QueuedRunStatus::Assigned;
            let assigned = entry.clone();

            return Ok(Some(Assignment {
                queued_run: assigned,
                lease,
                candidate,
            }));
        }

        Ok(None)
    }

    async fn get_lease(&self, lease_id: &str) -> ConductorResult<Option<Lease>> {
        Ok(self.leases.lock().unwrap().get(lease_id).cloned())
    }

    async fn list_expired_leases(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ConductorResult<Vec<Lease>> {
        let mut expired: Vec<Lease> = self
            .leases
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.state == LeaseState::Active && l.expires_at <= now)
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn renew_lease(
        &self,
        lease_id: &str,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> ConductorResult<Lease> {
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(lease_id) {
            Some(lease) if lease.is_live(now) => {
                lease.renewed_at = now;
                lease.expires_at = now + Duration::seconds(ttl_seconds);
                Ok(lease.clone())
            }
            Some(_) => Err(ConductorError::LeaseExpired {
                lease_id: lease_id.to_string(),
            }),
            None => Err(ConductorError::UnknownLease {
                lease_id: lease_id.to_string(),
            }),
        }
    }

    async fn release_lease(&self, lease_id: &str, now: DateTime<Utc>) -> ConductorResult<Lease> {
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(lease_id) {
            Some(lease) if lease.is_live(now) => {
                lease.state = LeaseState::Released;
                Ok(lease.clone())
            }
            Some(_) => Err(ConductorError::LeaseExpired {
                lease_id: lease_id.to_string(),
            }),
            None => Err(ConductorError::UnknownLease {
                lease_id: lease_id.to_string(),
            }),
        }
    }

    async fn reclaim_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<bool> {
        let mut leases = self.leases.lock().unwrap();
        let lease = match leases.get_mut(lease_id) {
            Some(l) if l.state == LeaseState::Active && l.expires_at <= now => l,
            _ => return Ok(false),
        };
        lease.state = LeaseState::Reclaimed;
        let run_id = lease.run_id.clone();
        let queued_run_id = lease.queued_run_id;
        drop(leases);

        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&queued_run_id) {
                entry.status = QueuedRunStatus::Pending;
                entry.attempt_count += 1;
                entry.eligible_at = eligible_at;
            }
        }

        if let Some(runs) = &self.run_repository {
            let mut map = runs.runs.lock().unwrap();
            if let Some(run) = map.get_mut(&run_id) {
                if run.outcome.is_none() {
                    run.outcome = Some(RunOutcome::TransientFailure);
                    run.code = Some("lease-expired".to_string());
                    run.description =
                        Some("lease expired before a result was submitted".to_string());
                    run.finished_at = Some(now);
                }
            }
        }
        Ok(true)
    }

    async fn revoke_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<bool> {
        let mut leases = self.leases.lock().unwrap();
        let lease = match leases.get_mut(lease_id) {
            Some(l) if l.state == LeaseState::Active => l,
            _ => return Ok(false),
        };
        lease.state = LeaseState::Reclaimed;
        let run_id = lease.run_id.clone();
        let queued_run_id = lease.queued_run_id;
        drop(leases);

        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&queued_run_id) {
                entry.status = QueuedRunStatus::Pending;
                entry.attempt_count += 1;
                entry.eligible_at = eligible_at;
            }
        }

        if let Some(runs) = &self.run_repository {
            let mut map = runs.runs.lock().unwrap();
            if let Some(run) = map.get_mut(&run_id) {
                if run.outcome.is_none() {
                    run.outcome = Some(RunOutcome::TransientFailure);
                    run.code = Some("lease-expired".to_string());
                    run.description = Some("lease revoked by operator".to_string());
                    run.finished_at = Some(now);
                }
            }
        }
        Ok(true)
    }

    async fn remove(&self, queued_run_id: i64) -> ConductorResult<()> {
        self.entries.lock().unwrap().remove(&queued_run_id);
        Ok(())
    }

    async fn requeue_transient(
        &self,
        queued_run_id: i64,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&queued_run_id)
            .ok_or(ConductorError::QueuedRunNotFound { id: queued_run_id })?;
        entry.status = QueuedRunStatus::Pending;
        entry.attempt_count += 1;
        entry.eligible_at = eligible_at;
        Ok(())
    }

    async fn pending_count(&self) -> ConductorResult<i64> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.status == QueuedRunStatus::Pending)
            .count() as i64)
    }
}

/// Mock implementation of ProposalRepository for testing
#[derive(Debug, Clone)]
pub struct MockProposalRepository {
    proposals: Arc<Mutex<HashMap<i64, Proposal>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockProposalRepository {
    pub fn new() -> Self {
        Self {
            proposals: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_proposals(proposals: Vec<Proposal>) -> Self {
        let mut map = HashMap::new();
        let mut max_id = 0;

        for proposal in proposals {
            if proposal.id > max_id {
                max_id = proposal.id;
            }
            map.insert(proposal.id, proposal);
        }

        Self {
            proposals: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.proposals.lock().unwrap().len()
    }

    pub fn all_proposals(&self) -> Vec<Proposal> {
        self.proposals.lock().unwrap().values().cloned().collect()
    }
}

impl Default for MockProposalRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalRepository for MockProposalRepository {
    async fn create(&self, proposal: &Proposal) -> ConductorResult<Proposal> {
        let mut proposals = self.proposals.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut created = proposal.clone();
        created.id = *next_id;
        *next_id += 1;
        proposals.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Proposal>> {
        Ok(self.proposals.lock().unwrap().get(&id).cloned())
    }

    async fn get_open_for(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<Option<Proposal>> {
        let proposals = self.proposals.lock().unwrap();
        let mut open: Vec<&Proposal> = proposals
            .values()
            .filter(|p| p.campaign == campaign && p.target == target && p.is_open())
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(open.first().map(|p| (*p).clone()))
    }

    async fn supersede(&self, old_id: i64, replacement: &Proposal) -> ConductorResult<Proposal> {
        let mut proposals = self.proposals.lock().unwrap();

        if let Some(old) = proposals.get_mut(&old_id) {
            if old.is_open() {
                old.status = ProposalStatus::Closed;
                old.updated_at = replacement.created_at;
            }
        }

        let mut next_id = self.next_id.lock().unwrap();
        let mut created = replacement.clone();
        created.id = *next_id;
        *next_id += 1;
        proposals.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_status(
        &self,
        id: i64,
        status: ProposalStatus,
        at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let mut proposals = self.proposals.lock().unwrap();
        let proposal = proposals
            .get_mut(&id)
            .ok_or(ConductorError::ProposalNotFound { id })?;
        proposal.status = status;
        proposal.updated_at = at;
        proposal.last_checked_at = Some(at);
        Ok(())
    }

    async fn touch_checked(&self, id: i64, at: DateTime<Utc>) -> ConductorResult<()> {
        let mut proposals = self.proposals.lock().unwrap();
        let proposal = proposals
            .get_mut(&id)
            .ok_or(ConductorError::ProposalNotFound { id })?;
        proposal.last_checked_at = Some(at);
        Ok(())
    }

    async fn list_open(&self, limit: i64) -> ConductorResult<Vec<Proposal>> {
        let mut open: Vec<Proposal> = self
            .proposals
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        // 从未核对的排最前，其余按最久未核对排序
        open.sort_by(|a, b| match (a.last_checked_at, b.last_checked_at) {
            (None, None) => a.id.cmp(&b.id),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
        });
        open.truncate(limit as usize);
        Ok(open)
    }

    async fn list_created_since(&self, since: DateTime<Utc>) -> ConductorResult<Vec<Proposal>> {
        let mut recent: Vec<Proposal> = self
            .proposals
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.created_at >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recent)
    }
}

/// Mock implementation of LockService for testing
///
/// Token and expiry semantics match the Redis backend; tests create
/// contention by holding a handle from an earlier `acquire`.
#[derive(Debug, Clone, Default)]
pub struct MockLockService {
    locks: Arc<Mutex<HashMap<String, (String, DateTime<Utc>)>>>,
}

impl MockLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        let locks = self.locks.lock().unwrap();
        locks
            .get(key)
            .map(|(_, expires_at)| *expires_at > Utc::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockService for MockLockService {
    async fn acquire(&self, key: &str, ttl_seconds: u64) -> ConductorResult<LockHandle> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();

        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Err(ConductorError::LockContended {
                    key: key.to_string(),
                });
            }
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = now + Duration::seconds(ttl_seconds as i64);
        locks.insert(key.to_string(), (token.clone(), expires_at));
        Ok(LockHandle::new(key, token, expires_at))
    }

    async fn renew(&self, handle: &LockHandle, ttl_seconds: u64) -> ConductorResult<LockHandle> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();

        match locks.get_mut(&handle.key) {
            Some((token, expires_at)) if *token == handle.token && *expires_at > now => {
                *expires_at = now + Duration::seconds(ttl_seconds as i64);
                Ok(LockHandle::new(
                    handle.key.as_str(),
                    handle.token.as_str(),
                    *expires_at,
                ))
            }
            _ => Err(ConductorError::LockExpired {
                key: handle.key.clone(),
            }),
        }
    }

    async fn release(&self, handle: &LockHandle) -> ConductorResult<bool> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();

        match locks.get(&handle.key) {
            Some((token, expires_at)) if *token == handle.token && *expires_at > now => {
                locks.remove(&handle.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Mock implementation of PublishMechanism for testing
///
/// Responses can be scripted in order with [`succeed_with`] and
/// [`fail_with`]; an unscripted call succeeds with a synthetic URL.
/// Every request is recorded for assertion.
///
/// [`succeed_with`]: MockPublishMechanism::succeed_with
/// [`fail_with`]: MockPublishMechanism::fail_with
#[derive(Debug, Clone, Default)]
pub struct MockPublishMechanism {
    scripted: Arc<Mutex<VecDeque<ConductorResult<PublishReceipt>>>>,
    requests: Arc<Mutex<Vec<PublishRequest>>>,
    proposal_statuses: Arc<Mutex<HashMap<String, ProposalStatus>>>,
    checked_urls: Arc<Mutex<Vec<String>>>,
}

impl MockPublishMechanism {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_with(&self, url: &str, mode: PublishMode) {
        let status = match mode {
            PublishMode::Push => ProposalStatus::Merged,
            _ => ProposalStatus::Open,
        };
        self.scripted.lock().unwrap().push_back(Ok(PublishReceipt {
            url: url.to_string(),
            status,
            mode,
            description: None,
        }));
    }

    pub fn fail_with(&self, code: &str, description: &str) {
        self.scripted
            .lock()
            .unwrap()
            .push_back(Err(ConductorError::Publish {
                code: code.to_string(),
                description: description.to_string(),
            }));
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Set the status `check_proposal` reports for a URL; unset URLs report `Open`.
    pub fn set_proposal_status(&self, url: &str, status: ProposalStatus) {
        self.proposal_statuses
            .lock()
            .unwrap()
            .insert(url.to_string(), status);
    }

    pub fn checked_urls(&self) -> Vec<String> {
        self.checked_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublishMechanism for MockPublishMechanism {
    async fn publish(&self, request: &PublishRequest) -> ConductorResult<PublishReceipt> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(scripted) = self.scripted.lock().unwrap().pop_front() {
            return scripted;
        }

        let mode = match request.mode {
            PublishMode::AttemptPush => PublishMode::Push,
            m => m,
        };
        let status = match mode {
            PublishMode::Push => ProposalStatus::Merged,
            _ => ProposalStatus::Open,
        };
        Ok(PublishReceipt {
            url: format!(
                "https://forge.example/{}/{}/mp/1",
                request.campaign, request.target
            ),
            status,
            mode,
            description: request.description.clone(),
        })
    }

    async fn check_proposal(&self, url: &str) -> ConductorResult<ProposalStatus> {
        self.checked_urls.lock().unwrap().push(url.to_string());
        Ok(self
            .proposal_statuses
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(ProposalStatus::Open))
    }
}
