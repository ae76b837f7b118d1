use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::PublishMode;

/// 对外可见的发布产物（分支推送或合并请求）
///
/// 同一候选项的后续成功运行会就地更新（supersede）已打开的提案，
/// 而不是新建重复提案。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: i64,
    pub candidate_id: i64,
    pub campaign: String,
    pub target: String,
    /// 当前提案对应的运行记录（被supersede时随之更新）
    pub run_id: String,
    /// 发布时解析后的实际模式，只会是 Push / Propose / Attach
    pub mode: PublishMode,
    pub status: ProposalStatus,
    /// 外部提案地址（合并请求URL或分支引用）
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 提案状态监视循环最近一次核对的时间
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn new(
        candidate_id: i64,
        campaign: &str,
        target: &str,
        run_id: &str,
        mode: PublishMode,
        url: &str,
        status: ProposalStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            candidate_id,
            campaign: campaign.to_string(),
            target: target.to_string(),
            run_id: run_id.to_string(),
            mode,
            status,
            url: url.to_string(),
            created_at: now,
            updated_at: now,
            last_checked_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, ProposalStatus::Open)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProposalStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "MERGED")]
    Merged,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl sqlx::Type<sqlx::Postgres> for ProposalStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for ProposalStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ProposalStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        ProposalStatus::from_db_str(s)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ProposalStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        ProposalStatus::from_db_str(s)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ProposalStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_db_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ProposalStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_db_str(), buf)
    }
}

impl ProposalStatus {
    fn as_db_str(&self) -> &'static str {
        match self {
            ProposalStatus::Open => "OPEN",
            ProposalStatus::Merged => "MERGED",
            ProposalStatus::Closed => "CLOSED",
            ProposalStatus::Rejected => "REJECTED",
        }
    }

    fn from_db_str(s: &str) -> Result<Self, sqlx::error::BoxDynError> {
        match s {
            "OPEN" => Ok(ProposalStatus::Open),
            "MERGED" => Ok(ProposalStatus::Merged),
            "CLOSED" => Ok(ProposalStatus::Closed),
            "REJECTED" => Ok(ProposalStatus::Rejected),
            _ => Err(format!("Invalid proposal status: {s}").into()),
        }
    }
}
