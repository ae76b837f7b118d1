use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    models::Candidate, traits::CandidateRepository, ConductorError, ConductorResult,
};
use sqlx::{types::Json, PgPool, Row};
use tracing::{debug, instrument};

pub struct PostgresCandidateRepository {
    pool: PgPool,
}

impl PostgresCandidateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_candidate(row: &sqlx::postgres::PgRow) -> ConductorResult<Candidate> {
        let capabilities: Json<Vec<String>> = row.try_get("required_capabilities")?;
        Ok(Candidate {
            id: row.try_get("id")?,
            campaign: row.try_get("campaign")?,
            target: row.try_get("target")?,
            command: row.try_get("command")?,
            priority: row.try_get("priority")?,
            publish_mode: row.try_get("publish_mode")?,
            required_capabilities: capabilities.0,
            last_attempt_at: row.try_get("last_attempt_at")?,
            stuck: row.try_get("stuck")?,
            stuck_reason: row.try_get("stuck_reason")?,
            stuck_at: row.try_get("stuck_at")?,
            publish_attempts: row.try_get("publish_attempts")?,
            next_publish_at: row.try_get("next_publish_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CandidateRepository for PostgresCandidateRepository {
    #[instrument(skip(self, candidate), fields(
        campaign = %candidate.campaign,
        target = %candidate.target,
    ))]
    async fn upsert(&self, candidate: &Candidate) -> ConductorResult<Candidate> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO candidates (campaign, target, command, priority, publish_mode,
                                    required_capabilities, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (campaign, target) DO UPDATE SET
                command = EXCLUDED.command,
                priority = EXCLUDED.priority,
                publish_mode = EXCLUDED.publish_mode,
                required_capabilities = EXCLUDED.required_capabilities,
                updated_at = EXCLUDED.updated_at
            RETURNING id, campaign, target, command, priority, publish_mode,
                      required_capabilities, last_attempt_at, stuck, stuck_reason, stuck_at,
                      publish_attempts, next_publish_at, created_at, updated_at
            "#,
        )
        .bind(&candidate.campaign)
        .bind(&candidate.target)
        .bind(&candidate.command)
        .bind(candidate.priority)
        .bind(candidate.publish_mode)
        .bind(Json(&candidate.required_capabilities))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let stored = Self::row_to_candidate(&row)?;
        debug!("候选项已写入: {}/{}", stored.campaign, stored.target);
        Ok(stored)
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Candidate>> {
        let row = sqlx::query(
            r#"
            SELECT id, campaign, target, command, priority, publish_mode,
                   required_capabilities, last_attempt_at, stuck, stuck_reason, stuck_at,
                   publish_attempts, next_publish_at, created_at, updated_at
            FROM candidates WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_candidate(&r)).transpose()
    }

    async fn get_by_key(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<Option<Candidate>> {
        let row = sqlx::query(
            r#"
            SELECT id, campaign, target, command, priority, publish_mode,
                   required_capabilities, last_attempt_at, stuck, stuck_reason, stuck_at,
                   publish_attempts, next_publish_at, created_at, updated_at
            FROM candidates WHERE campaign = $1 AND target = $2
            "#,
        )
        .bind(campaign)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_candidate(&r)).transpose()
    }

    #[instrument(skip(self))]
    async fn list_unqueued(&self, limit: i64) -> ConductorResult<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign, target, command, priority, publish_mode,
                   required_capabilities, last_attempt_at, stuck, stuck_reason, stuck_at,
                   publish_attempts, next_publish_at, created_at, updated_at
            FROM candidates c
            WHERE c.stuck = FALSE
              AND NOT EXISTS (SELECT 1 FROM queued_runs q WHERE q.candidate_id = c.id)
              AND NOT EXISTS (
                  SELECT 1 FROM runs r WHERE r.candidate_id = c.id AND r.outcome = 'SUCCESS'
              )
            ORDER BY c.priority DESC, c.id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(Self::row_to_candidate)
            .collect::<ConductorResult<Vec<_>>>()?;
        debug!("待入队候选项: {} 条", candidates.len());
        Ok(candidates)
    }

    async fn touch_attempt(&self, id: i64, at: DateTime<Utc>) -> ConductorResult<()> {
        let result = sqlx::query(
            "UPDATE candidates SET last_attempt_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::DatabaseOperation(format!(
                "候选项不存在: id={id}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_stuck(&self, id: i64, reason: &str, at: DateTime<Utc>) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET stuck = TRUE, stuck_reason = $2, stuck_at = $3, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::DatabaseOperation(format!(
                "候选项不存在: id={id}"
            )));
        }
        Ok(())
    }

    async fn clear_stuck(&self, id: i64) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET stuck = FALSE, stuck_reason = NULL, stuck_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::DatabaseOperation(format!(
                "候选项不存在: id={id}"
            )));
        }
        Ok(())
    }

    async fn set_publish_backoff(
        &self,
        id: i64,
        attempts: i32,
        next_at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET publish_attempts = $2, next_publish_at = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(next_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::DatabaseOperation(format!(
                "候选项不存在: id={id}"
            )));
        }
        Ok(())
    }

    async fn reset_publish_backoff(&self, id: i64) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET publish_attempts = 0, next_publish_at = NULL, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::DatabaseOperation(format!(
                "候选项不存在: id={id}"
            )));
        }
        Ok(())
    }
}
