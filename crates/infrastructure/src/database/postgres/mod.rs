pub mod postgres_candidate_repository;
pub mod postgres_proposal_repository;
pub mod postgres_queue_repository;
pub mod postgres_run_repository;

pub use postgres_candidate_repository::PostgresCandidateRepository;
pub use postgres_proposal_repository::PostgresProposalRepository;
pub use postgres_queue_repository::PostgresQueueRepository;
pub use postgres_run_repository::PostgresRunRepository;
