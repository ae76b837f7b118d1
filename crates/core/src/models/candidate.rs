use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 候选项：一次潜在的自动化变更工作单元，以 (campaign, target) 唯一标识
///
/// 候选项由外部的活动发现流程创建；控制面只更新其调度元数据
/// （最近尝试时间、发布退避、stuck状态），活动存续期间不删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    /// 活动名称，如 "lintian-fixes"
    pub campaign: String,
    /// 目标仓库标识，host部分作为限流类别
    pub target: String,
    /// Worker执行的活动命令
    pub command: String,
    /// 调度优先级提示，越大越优先
    pub priority: i32,
    /// 发布策略
    pub publish_mode: PublishMode,
    /// Worker必须具备的能力集合
    pub required_capabilities: Vec<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// 超过重试/发布上限后置位，等待运维介入
    pub stuck: bool,
    pub stuck_reason: Option<String>,
    pub stuck_at: Option<DateTime<Utc>>,
    /// 当前发布失败连续次数
    pub publish_attempts: i32,
    /// 发布退避截止时间，为空表示随时可发布
    pub next_publish_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(campaign: &str, target: &str, command: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            campaign: campaign.to_string(),
            target: target.to_string(),
            command: command.to_string(),
            priority: 0,
            publish_mode: PublishMode::Propose,
            required_capabilities: Vec::new(),
            last_attempt_at: None,
            stuck: false,
            stuck_reason: None,
            stuck_at: None,
            publish_attempts: 0,
            next_publish_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 限流类别：target的host部分
    pub fn target_class(&self) -> &str {
        target_host(&self.target)
    }

    /// 成功结果是否进入发布流程
    pub fn is_publishable(&self) -> bool {
        !self.stuck && self.publish_mode.publishes()
    }
}

/// 从目标标识中提取host，作为限流类别
///
/// target形如 "https://host/path" 或 "host/path"，无法解析时整体作为类别。
pub fn target_host(target: &str) -> &str {
    let rest = match target.find("://") {
        Some(pos) => &target[pos + 3..],
        None => target,
    };
    match rest.find('/') {
        Some(pos) => &rest[..pos],
        None => rest,
    }
}

/// 发布策略
///
/// `Skip` 与 `BuildOnly` 仅运行不发布；`AttemptPush` 先尝试push，
/// 托管方拒绝push权限时回退为propose；`Attach` 推送派生分支并挂靠到提案记录。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PublishMode {
    #[serde(rename = "SKIP")]
    Skip,
    #[serde(rename = "BUILD_ONLY")]
    BuildOnly,
    #[serde(rename = "PUSH")]
    Push,
    #[serde(rename = "ATTEMPT_PUSH")]
    AttemptPush,
    #[serde(rename = "PROPOSE")]
    Propose,
    #[serde(rename = "ATTACH")]
    Attach,
}

impl PublishMode {
    /// 该策略是否产生外部发布动作
    pub fn publishes(&self) -> bool {
        !matches!(self, PublishMode::Skip | PublishMode::BuildOnly)
    }
}

impl sqlx::Type<sqlx::Postgres> for PublishMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for PublishMode {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for PublishMode {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        PublishMode::from_db_str(s)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for PublishMode {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        PublishMode::from_db_str(s)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for PublishMode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_db_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for PublishMode {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_db_str(), buf)
    }
}

impl PublishMode {
    fn as_db_str(&self) -> &'static str {
        match self {
            PublishMode::Skip => "SKIP",
            PublishMode::BuildOnly => "BUILD_ONLY",
            PublishMode::Push => "PUSH",
            PublishMode::AttemptPush => "ATTEMPT_PUSH",
            PublishMode::Propose => "PROPOSE",
            PublishMode::Attach => "ATTACH",
        }
    }

    fn from_db_str(s: &str) -> Result<Self, sqlx::error::BoxDynError> {
        match s {
            "SKIP" => Ok(PublishMode::Skip),
            "BUILD_ONLY" => Ok(PublishMode::BuildOnly),
            "PUSH" => Ok(PublishMode::Push),
            "ATTEMPT_PUSH" => Ok(PublishMode::AttemptPush),
            "PROPOSE" => Ok(PublishMode::Propose),
            "ATTACH" => Ok(PublishMode::Attach),
            _ => Err(format!("Invalid publish mode: {s}").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_class_extraction() {
        let mut candidate = Candidate::new("lintian-fixes", "https://salsa.debian.org/jelmer/dulwich", "fix-all");
        assert_eq!(candidate.target_class(), "salsa.debian.org");

        candidate.target = "github.com/example/repo".to_string();
        assert_eq!(candidate.target_class(), "github.com");

        candidate.target = "bare-host".to_string();
        assert_eq!(candidate.target_class(), "bare-host");
    }

    #[test]
    fn test_publishable_policy() {
        let mut candidate = Candidate::new("c", "t", "cmd");
        assert!(candidate.is_publishable());

        candidate.publish_mode = PublishMode::BuildOnly;
        assert!(!candidate.is_publishable());

        candidate.publish_mode = PublishMode::Push;
        candidate.stuck = true;
        assert!(!candidate.is_publishable());
    }

    #[test]
    fn test_publish_mode_round_trip() {
        for mode in [
            PublishMode::Skip,
            PublishMode::BuildOnly,
            PublishMode::Push,
            PublishMode::AttemptPush,
            PublishMode::Propose,
            PublishMode::Attach,
        ] {
            assert_eq!(
                PublishMode::from_db_str(mode.as_db_str()).unwrap(),
                mode
            );
        }
        assert!(PublishMode::from_db_str("bogus").is_err());
    }
}
