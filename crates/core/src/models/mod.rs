pub mod candidate;
pub mod lease;
pub mod proposal;
pub mod protocol;
pub mod queued_run;
pub mod run;

pub use candidate::{target_host, Candidate, PublishMode};
pub use lease::{Lease, LeaseState};
pub use proposal::{Proposal, ProposalStatus};
pub use protocol::{
    AssignRequest, AssignmentPayload, CandidateDescriptor, HeartbeatPayload, ResultAccepted,
    ResultSubmission,
};
pub use queued_run::{QueuedRun, QueuedRunStatus};
pub use run::{Run, RunOutcome, TRANSIENT_RESULT_CODES};
