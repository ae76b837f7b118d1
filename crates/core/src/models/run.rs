use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 默认归类为瞬时失败的结果码（基础设施/环境类故障，可重试）
///
/// 可通过配置追加；不在列表中的非成功结果码视为候选项自身的永久失败。
pub const TRANSIENT_RESULT_CODES: &[&str] = &[
    "worker-timeout",
    "worker-failure",
    "lease-expired",
    "no-space-on-device",
    "vcs-unavailable",
    "fetch-failed",
    "session-setup-failure",
];

/// 一次执行尝试的历史记录
///
/// 在分配时创建（in-progress），收到结果或租约回收时定稿。
/// 定稿后不可变；每个候选项的历史只追加、不改写。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub candidate_id: i64,
    pub campaign: String,
    pub target: String,
    pub worker_id: Option<String>,
    /// 分配时排队项的已尝试次数
    pub attempt: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 定稿前为空
    pub outcome: Option<RunOutcome>,
    /// Worker上报的结果码，如 "success"、"worker-timeout"
    pub code: Option<String>,
    pub description: Option<String>,
    /// 产物引用（分支名、构建产物地址等）
    pub artifacts: serde_json::Value,
    pub log_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(candidate_id: i64, campaign: &str, target: &str, worker_id: &str, attempt: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            candidate_id,
            campaign: campaign.to_string(),
            target: target.to_string(),
            worker_id: Some(worker_id.to_string()),
            attempt,
            started_at: now,
            finished_at: None,
            outcome: None,
            code: None,
            description: None,
            artifacts: serde_json::Value::Null,
            log_ref: None,
            created_at: now,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.outcome, Some(RunOutcome::Success))
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }
}

/// 结果归类：封闭枚举，结果入库处必须穷尽匹配
///
/// 新增归类是编译期可见的改动，不存在落入默认分支的未知结果。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    #[serde(rename = "SUCCESS")]
    Success,
    /// 基础设施/环境故障，按退避策略重试
    #[serde(rename = "TRANSIENT_FAILURE")]
    TransientFailure,
    /// 变更本身无效，不自动重试，候选项标记stuck
    #[serde(rename = "PERMANENT_FAILURE")]
    PermanentFailure,
}

impl RunOutcome {
    /// 根据Worker上报的结果码归类
    pub fn classify(code: &str, extra_transient: &[String]) -> Self {
        if code == "success" {
            return RunOutcome::Success;
        }
        if TRANSIENT_RESULT_CODES.contains(&code)
            || extra_transient.iter().any(|c| c == code)
        {
            return RunOutcome::TransientFailure;
        }
        RunOutcome::PermanentFailure
    }
}

impl sqlx::Type<sqlx::Postgres> for RunOutcome {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for RunOutcome {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for RunOutcome {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "SUCCESS" => Ok(RunOutcome::Success),
            "TRANSIENT_FAILURE" => Ok(RunOutcome::TransientFailure),
            "PERMANENT_FAILURE" => Ok(RunOutcome::PermanentFailure),
            _ => Err(format!("Invalid run outcome: {s}").into()),
        }
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunOutcome {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "SUCCESS" => Ok(RunOutcome::Success),
            "TRANSIENT_FAILURE" => Ok(RunOutcome::TransientFailure),
            "PERMANENT_FAILURE" => Ok(RunOutcome::PermanentFailure),
            _ => Err(format!("Invalid run outcome: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for RunOutcome {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::TransientFailure => "TRANSIENT_FAILURE",
            RunOutcome::PermanentFailure => "PERMANENT_FAILURE",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunOutcome {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::TransientFailure => "TRANSIENT_FAILURE",
            RunOutcome::PermanentFailure => "PERMANENT_FAILURE",
        };
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(s, buf)
    }
}
