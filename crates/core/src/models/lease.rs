use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 租约：把一条排队项绑定到一个Worker，带过期时间
///
/// 不变量：每条排队项同时最多存在一个活动且未过期的租约。
/// 释放或回收后记录保留，用于区分迟到结果（`LeaseExpired`）
/// 与完全未知的租约号（`UnknownLease`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub queued_run_id: i64,
    /// 本次尝试对应的运行记录
    pub run_id: String,
    pub candidate_id: i64,
    pub worker_id: String,
    pub target: String,
    pub state: LeaseState,
    pub acquired_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        queued_run_id: i64,
        candidate_id: i64,
        run_id: &str,
        worker_id: &str,
        target: &str,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queued_run_id,
            run_id: run_id.to_string(),
            candidate_id,
            worker_id: worker_id.to_string(),
            target: target.to_string(),
            state: LeaseState::Active,
            acquired_at: now,
            renewed_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds),
        }
    }

    /// 租约当前是否有效（活动状态且未到期）
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, LeaseState::Active) && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LeaseState {
    #[serde(rename = "ACTIVE")]
    Active,
    /// 正常收到结果后释放
    #[serde(rename = "RELEASED")]
    Released,
    /// 过期未续约，排队项已被回收重新入队
    #[serde(rename = "RECLAIMED")]
    Reclaimed,
}

impl sqlx::Type<sqlx::Postgres> for LeaseState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for LeaseState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for LeaseState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "ACTIVE" => Ok(LeaseState::Active),
            "RELEASED" => Ok(LeaseState::Released),
            "RECLAIMED" => Ok(LeaseState::Reclaimed),
            _ => Err(format!("Invalid lease state: {s}").into()),
        }
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for LeaseState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "ACTIVE" => Ok(LeaseState::Active),
            "RELEASED" => Ok(LeaseState::Released),
            "RECLAIMED" => Ok(LeaseState::Reclaimed),
            _ => Err(format!("Invalid lease state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for LeaseState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            LeaseState::Active => "ACTIVE",
            LeaseState::Released => "RELEASED",
            LeaseState::Reclaimed => "RECLAIMED",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for LeaseState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            LeaseState::Active => "ACTIVE",
            LeaseState::Released => "RELEASED",
            LeaseState::Reclaimed => "RECLAIMED",
        };
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(s, buf)
    }
}
