pub mod sqlite_candidate_repository;
pub mod sqlite_proposal_repository;
pub mod sqlite_queue_repository;
pub mod sqlite_run_repository;

pub use sqlite_candidate_repository::SqliteCandidateRepository;
pub use sqlite_proposal_repository::SqliteProposalRepository;
pub use sqlite_queue_repository::SqliteQueueRepository;
pub use sqlite_run_repository::SqliteRunRepository;

use conductor_core::ConductorResult;
use sqlx::SqlitePool;

/// 建立 SQLite 模式
///
/// 与 PostgreSQL 迁移保持同构，供单机部署和集成测试免 Docker 使用。
/// 时间戳以 TEXT 存储，JSON 列以 TEXT 存储。
pub async fn bootstrap_schema(pool: &SqlitePool) -> ConductorResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign TEXT NOT NULL,
            target TEXT NOT NULL,
            command TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            publish_mode TEXT NOT NULL DEFAULT 'PROPOSE',
            required_capabilities TEXT NOT NULL DEFAULT '[]',
            last_attempt_at TEXT,
            stuck INTEGER NOT NULL DEFAULT 0,
            stuck_reason TEXT,
            stuck_at TEXT,
            publish_attempts INTEGER NOT NULL DEFAULT 0,
            next_publish_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (campaign, target)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queued_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            candidate_id INTEGER NOT NULL UNIQUE REFERENCES candidates(id) ON DELETE CASCADE,
            campaign TEXT NOT NULL,
            target TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            eligible_at TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            refresh INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'PENDING',
            enqueued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_queued_runs_dispatch
            ON queued_runs (status, eligible_at, priority DESC, id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            candidate_id INTEGER NOT NULL REFERENCES candidates(id) ON DELETE CASCADE,
            campaign TEXT NOT NULL,
            target TEXT NOT NULL,
            worker_id TEXT,
            attempt INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            outcome TEXT,
            code TEXT,
            description TEXT,
            artifacts TEXT NOT NULL DEFAULT 'null',
            log_ref TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_candidate ON runs (candidate_id, started_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leases (
            id TEXT PRIMARY KEY,
            queued_run_id INTEGER NOT NULL,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            candidate_id INTEGER NOT NULL,
            worker_id TEXT NOT NULL,
            target TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'ACTIVE',
            acquired_at TEXT NOT NULL,
            renewed_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_leases_state_expiry ON leases (state, expires_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            candidate_id INTEGER NOT NULL REFERENCES candidates(id) ON DELETE CASCADE,
            campaign TEXT NOT NULL,
            target TEXT NOT NULL,
            run_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_checked_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_proposals_run ON proposals (run_id)")
        .execute(pool)
        .await?;

    Ok(())
}
