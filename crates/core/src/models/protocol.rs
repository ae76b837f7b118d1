use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lease::Lease;
use super::queued_run::QueuedRun;
use super::candidate::Candidate;

/// Worker协议报文
///
/// Worker通过HTTP轮询领取任务、心跳续约、上报结果；
/// 这些结构是控制面与Worker之间的全部契约。

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub worker_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// 分配响应：一次执行尝试需要的全部信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentPayload {
    pub run_id: String,
    pub lease_id: String,
    pub candidate: CandidateDescriptor,
    /// 租约到期时间，Worker必须在此之前心跳续约
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDescriptor {
    pub campaign: String,
    pub target: String,
    pub command: String,
    /// 要求放弃增量状态从头重建
    pub refresh: bool,
    pub attempt: i32,
}

impl AssignmentPayload {
    pub fn build(queued_run: &QueuedRun, lease: &Lease, candidate: &Candidate) -> Self {
        Self {
            run_id: lease.run_id.clone(),
            lease_id: lease.id.clone(),
            candidate: CandidateDescriptor {
                campaign: candidate.campaign.clone(),
                target: candidate.target.clone(),
                command: candidate.command.clone(),
                refresh: queued_run.refresh,
                attempt: queued_run.attempt_count,
            },
            expiry: lease.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub new_expiry: DateTime<Utc>,
}

/// Worker上报的终态结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSubmission {
    /// 结果码："success" 或失败码，由结果入库归类
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub artifacts: Option<serde_json::Value>,
    #[serde(default)]
    pub log_ref: Option<String>,
}

impl ResultSubmission {
    pub fn success() -> Self {
        Self {
            code: "success".to_string(),
            description: None,
            artifacts: None,
            log_ref: None,
        }
    }

    pub fn failure(code: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            description: Some(description.to_string()),
            artifacts: None,
            log_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultAccepted {
    pub run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_payload_carries_lease_and_candidate() {
        let mut candidate = Candidate::new("lintian-fixes", "example.org/repo", "fix-all");
        candidate.id = 3;
        let mut queued = QueuedRun::new(&candidate, 5);
        queued.id = 11;
        queued.attempt_count = 2;
        queued.refresh = true;
        let lease = Lease::new(queued.id, candidate.id, "run-x", "worker-a", &candidate.target, 300);

        let payload = AssignmentPayload::build(&queued, &lease, &candidate);
        assert_eq!(payload.run_id, "run-x");
        assert_eq!(payload.lease_id, lease.id);
        assert_eq!(payload.candidate.command, "fix-all");
        assert_eq!(payload.candidate.attempt, 2);
        assert!(payload.candidate.refresh);
        assert_eq!(payload.expiry, lease.expires_at);
    }

    #[test]
    fn test_result_submission_deserializes_with_defaults() {
        let submission: ResultSubmission =
            serde_json::from_str(r#"{"code": "success"}"#).unwrap();
        assert_eq!(submission.code, "success");
        assert!(submission.artifacts.is_none());
        assert!(submission.log_ref.is_none());
    }
}
