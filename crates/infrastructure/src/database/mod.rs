pub mod manager;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{
    PostgresCandidateRepository, PostgresProposalRepository, PostgresQueueRepository,
    PostgresRunRepository,
};
pub use sqlite::{
    SqliteCandidateRepository, SqliteProposalRepository, SqliteQueueRepository,
    SqliteRunRepository,
};
