use thiserror::Error;

/// 系统统一错误类型
///
/// 错误分层遵循控制面的故障语义：基础设施类错误可重试且不会标记候选项失败，
/// 租约/锁类错误是并发协调信号，候选项/发布类错误会落入持久状态供运维处理。
#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("数据库操作失败: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作失败: {0}")]
    DatabaseOperation(String),

    #[error("锁服务不可用: {0}")]
    LockService(String),

    /// 目标锁已被其他发布流程持有，调用方应延后重试而不是报错
    #[error("锁竞争: {key} 已被持有")]
    LockContended { key: String },

    #[error("锁已过期或不再持有: {key}")]
    LockExpired { key: String },

    #[error("租约不存在: {lease_id}")]
    UnknownLease { lease_id: String },

    /// 租约已过期并被回收，迟到的结果必须丢弃
    #[error("租约已过期: {lease_id}")]
    LeaseExpired { lease_id: String },

    #[error("候选项不存在: {campaign}/{target}")]
    CandidateNotFound { campaign: String, target: String },

    #[error("排队项不存在: {id}")]
    QueuedRunNotFound { id: i64 },

    #[error("运行记录不存在: {id}")]
    RunNotFound { id: String },

    #[error("发布提案不存在: {id}")]
    ProposalNotFound { id: i64 },

    /// 外部发布机制失败，有限次重试后候选项进入stuck-publish
    #[error("发布失败 [{code}]: {description}")]
    Publish { code: String, description: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("无效参数: {0}")]
    InvalidParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ConductorError {
    /// 是否为基础设施类瞬时错误（存储或锁服务不可达）
    ///
    /// 瞬时错误在发生点内部退避重试，绝不作为候选项失败上抛。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConductorError::Database(_)
                | ConductorError::DatabaseOperation(_)
                | ConductorError::LockService(_)
        )
    }

    /// 是否为预期的并发协调信号（不计为失败）
    pub fn is_contention(&self) -> bool {
        matches!(self, ConductorError::LockContended { .. })
    }

    /// 是否为租约竞态（结果丢弃、候选项回队）
    pub fn is_lease_race(&self) -> bool {
        matches!(
            self,
            ConductorError::LeaseExpired { .. } | ConductorError::UnknownLease { .. }
        )
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(e: serde_json::Error) -> Self {
        ConductorError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ConductorError::DatabaseOperation("timeout".to_string()).is_transient());
        assert!(ConductorError::LockService("connection refused".to_string()).is_transient());
        assert!(!ConductorError::Publish {
            code: "permission-denied".to_string(),
            description: "push rejected".to_string(),
        }
        .is_transient());
        assert!(!ConductorError::Configuration("bad ttl".to_string()).is_transient());
    }

    #[test]
    fn test_contention_is_not_transient() {
        let err = ConductorError::LockContended {
            key: "publish:example.org/repo".to_string(),
        };
        assert!(err.is_contention());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_lease_race_classification() {
        let expired = ConductorError::LeaseExpired {
            lease_id: "a-lease".to_string(),
        };
        let unknown = ConductorError::UnknownLease {
            lease_id: "b-lease".to_string(),
        };
        assert!(expired.is_lease_race());
        assert!(unknown.is_lease_race());
        assert!(!expired.is_contention());
    }

    #[test]
    fn test_error_display_contains_context() {
        let err = ConductorError::CandidateNotFound {
            campaign: "lintian-fixes".to_string(),
            target: "example.org/repo".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("lintian-fixes"));
        assert!(msg.contains("example.org/repo"));
    }
}
