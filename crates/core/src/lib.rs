pub mod backoff;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
// 仅重导出具体模型，避免glob冲突
pub use models::{
    AssignRequest, AssignmentPayload, Candidate, CandidateDescriptor, HeartbeatPayload, Lease,
    LeaseState, Proposal, ProposalStatus, PublishMode, QueuedRun, QueuedRunStatus, ResultAccepted,
    ResultSubmission, Run, RunOutcome,
};
pub use traits::{
    Assignment, AssignmentService, CandidateRepository, DeferredReason, LockHandle, LockService,
    ProposalRepository, PublishMechanism, PublishOutcome, PublishReceipt, PublishRequest,
    PublishService, PublishableRun, QueueRepository, ResultIngestionService, RunRepository,
};

/// 统一的Result类型
pub type ConductorResult<T> = std::result::Result<T, ConductorError>;
