use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

/// 排队中的待执行项
///
/// 不变量：同一 (campaign, target) 最多存在一条 `Pending` 或 `Assigned` 状态的
/// 记录；重复入队是upsert（最新者生效），不产生重复行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRun {
    pub id: i64,
    pub candidate_id: i64,
    pub campaign: String,
    pub target: String,
    pub priority: i32,
    /// 最早可被选中的时间，退避重试通过推迟该时间实现
    pub eligible_at: DateTime<Utc>,
    /// 已完成的尝试次数；回收与瞬时失败重入队时递增
    pub attempt_count: i32,
    /// 置位时要求Worker放弃增量状态从头重建
    pub refresh: bool,
    pub status: QueuedRunStatus,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedRun {
    pub fn new(candidate: &Candidate, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            candidate_id: candidate.id,
            campaign: candidate.campaign.clone(),
            target: candidate.target.clone(),
            priority,
            eligible_at: now,
            attempt_count: 0,
            refresh: false,
            status: QueuedRunStatus::Pending,
            enqueued_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, QueuedRunStatus::Pending)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.eligible_at <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueuedRunStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
}

impl sqlx::Type<sqlx::Postgres> for QueuedRunStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for QueuedRunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for QueuedRunStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "PENDING" => Ok(QueuedRunStatus::Pending),
            "ASSIGNED" => Ok(QueuedRunStatus::Assigned),
            _ => Err(format!("Invalid queued run status: {s}").into()),
        }
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for QueuedRunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "PENDING" => Ok(QueuedRunStatus::Pending),
            "ASSIGNED" => Ok(QueuedRunStatus::Assigned),
            _ => Err(format!("Invalid queued run status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for QueuedRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            QueuedRunStatus::Pending => "PENDING",
            QueuedRunStatus::Assigned => "ASSIGNED",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for QueuedRunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            QueuedRunStatus::Pending => "PENDING",
            QueuedRunStatus::Assigned => "ASSIGNED",
        };
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(s, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_queued_run_is_immediately_eligible() {
        let mut candidate = Candidate::new("lintian-fixes", "example.org/repo", "fix");
        candidate.id = 7;
        let item = QueuedRun::new(&candidate, 5);
        assert_eq!(item.candidate_id, 7);
        assert_eq!(item.priority, 5);
        assert_eq!(item.attempt_count, 0);
        assert!(item.is_eligible(Utc::now()));
    }

    #[test]
    fn test_deferred_item_not_eligible_until_delay_passes() {
        let candidate = Candidate::new("c", "t", "cmd");
        let mut item = QueuedRun::new(&candidate, 0);
        let now = Utc::now();
        item.eligible_at = now + Duration::seconds(120);
        assert!(!item.is_eligible(now));
        assert!(item.is_eligible(now + Duration::seconds(121)));
    }

    #[test]
    fn test_assigned_item_not_eligible() {
        let candidate = Candidate::new("c", "t", "cmd");
        let mut item = QueuedRun::new(&candidate, 0);
        item.status = QueuedRunStatus::Assigned;
        assert!(!item.is_eligible(Utc::now()));
    }
}
