use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    models::{Candidate, PublishMode, Run, RunOutcome},
    traits::{PublishableRun, RunRepository},
    ConductorError, ConductorResult,
};
use sqlx::{types::Json, PgPool, Row};
use tracing::{debug, instrument};

pub struct PostgresRunRepository {
    pool: PgPool,
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::postgres::PgRow) -> ConductorResult<Run> {
        let artifacts: Json<serde_json::Value> = row.try_get("artifacts")?;
        Ok(Run {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            campaign: row.try_get("campaign")?,
            target: row.try_get("target")?,
            worker_id: row.try_get("worker_id")?,
            attempt: row.try_get("attempt")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            outcome: row.try_get("outcome")?,
            code: row.try_get("code")?,
            description: row.try_get("description")?,
            artifacts: artifacts.0,
            log_ref: row.try_get("log_ref")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_publishable(row: &sqlx::postgres::PgRow) -> ConductorResult<PublishableRun> {
        let capabilities: Json<Vec<String>> = row.try_get("c_required_capabilities")?;
        let candidate = Candidate {
            id: row.try_get("c_id")?,
            campaign: row.try_get("c_campaign")?,
            target: row.try_get("c_target")?,
            command: row.try_get("c_command")?,
            priority: row.try_get("c_priority")?,
            publish_mode: row.try_get("c_publish_mode")?,
            required_capabilities: capabilities.0,
            last_attempt_at: row.try_get("c_last_attempt_at")?,
            stuck: row.try_get("c_stuck")?,
            stuck_reason: row.try_get("c_stuck_reason")?,
            stuck_at: row.try_get("c_stuck_at")?,
            publish_attempts: row.try_get("c_publish_attempts")?,
            next_publish_at: row.try_get("c_next_publish_at")?,
            created_at: row.try_get("c_created_at")?,
            updated_at: row.try_get("c_updated_at")?,
        };
        let artifacts: Json<serde_json::Value> = row.try_get("r_artifacts")?;
        let run = Run {
            id: row.try_get("r_id")?,
            candidate_id: row.try_get("r_candidate_id")?,
            campaign: row.try_get("r_campaign")?,
            target: row.try_get("r_target")?,
            worker_id: row.try_get("r_worker_id")?,
            attempt: row.try_get("r_attempt")?,
            started_at: row.try_get("r_started_at")?,
            finished_at: row.try_get("r_finished_at")?,
            outcome: row.try_get("r_outcome")?,
            code: row.try_get("r_code")?,
            description: row.try_get("r_description")?,
            artifacts: artifacts.0,
            log_ref: row.try_get("r_log_ref")?,
            created_at: row.try_get("r_created_at")?,
        };
        Ok(PublishableRun { candidate, run })
    }
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn get_by_id(&self, run_id: &str) -> ConductorResult<Option<Run>> {
        let row = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, worker_id, attempt, started_at,
                   finished_at, outcome, code, description, artifacts, log_ref, created_at
            FROM runs WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_run(&r)).transpose()
    }

    #[instrument(skip(self, artifacts, description), fields(run_id = %run_id, code = %code))]
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        run_id: &str,
        outcome: RunOutcome,
        code: &str,
        description: Option<&str>,
        artifacts: &serde_json::Value,
        log_ref: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> ConductorResult<Run> {
        let row = sqlx::query(
            r#"
            UPDATE runs
            SET outcome = $2, code = $3, description = $4, artifacts = $5,
                log_ref = $6, finished_at = $7
            WHERE id = $1 AND outcome IS NULL
            RETURNING id, candidate_id, campaign, target, worker_id, attempt, started_at,
                      finished_at, outcome, code, description, artifacts, log_ref, created_at
            "#,
        )
        .bind(run_id)
        .bind(outcome)
        .bind(code)
        .bind(description)
        .bind(Json(artifacts))
        .bind(log_ref)
        .bind(finished_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let run = Self::row_to_run(&row)?;
                debug!("运行已终结: {} [{}]", run.id, code);
                Ok(run)
            }
            None => match self.get_by_id(run_id).await? {
                Some(_) => Err(ConductorError::Internal(format!(
                    "运行已终结，拒绝重复写入: {run_id}"
                ))),
                None => Err(ConductorError::RunNotFound {
                    id: run_id.to_string(),
                }),
            },
        }
    }

    async fn list_for_candidate(
        &self,
        candidate_id: i64,
        limit: i64,
    ) -> ConductorResult<Vec<Run>> {
        let rows = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, worker_id, attempt, started_at,
                   finished_at, outcome, code, description, artifacts, log_ref, created_at
            FROM runs
            WHERE candidate_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(candidate_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_run).collect()
    }

    async fn latest_success_for_candidate(
        &self,
        candidate_id: i64,
    ) -> ConductorResult<Option<Run>> {
        let row = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, worker_id, attempt, started_at,
                   finished_at, outcome, code, description, artifacts, log_ref, created_at
            FROM runs
            WHERE candidate_id = $1 AND outcome = $2
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .bind(RunOutcome::Success)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_run(&r)).transpose()
    }

    #[instrument(skip(self))]
    async fn publish_ready(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ConductorResult<Vec<PublishableRun>> {
        // 候选项的最近一次已终结运行必须是成功的，且该运行尚无提案
        let rows = sqlx::query(
            r#"
            SELECT c.id AS c_id, c.campaign AS c_campaign, c.target AS c_target,
                   c.command AS c_command, c.priority AS c_priority,
                   c.publish_mode AS c_publish_mode,
                   c.required_capabilities AS c_required_capabilities,
                   c.last_attempt_at AS c_last_attempt_at, c.stuck AS c_stuck,
                   c.stuck_reason AS c_stuck_reason, c.stuck_at AS c_stuck_at,
                   c.publish_attempts AS c_publish_attempts,
                   c.next_publish_at AS c_next_publish_at,
                   c.created_at AS c_created_at, c.updated_at AS c_updated_at,
                   r.id AS r_id, r.candidate_id AS r_candidate_id, r.campaign AS r_campaign,
                   r.target AS r_target, r.worker_id AS r_worker_id, r.attempt AS r_attempt,
                   r.started_at AS r_started_at, r.finished_at AS r_finished_at,
                   r.outcome AS r_outcome, r.code AS r_code, r.description AS r_description,
                   r.artifacts AS r_artifacts, r.log_ref AS r_log_ref,
                   r.created_at AS r_created_at
            FROM candidates c
            JOIN runs r ON r.id = (
                SELECT r2.id FROM runs r2
                WHERE r2.candidate_id = c.id AND r2.outcome IS NOT NULL
                ORDER BY r2.started_at DESC
                LIMIT 1
            )
            WHERE r.outcome = $1
              AND c.stuck = FALSE
              AND c.publish_mode NOT IN ($2, $3)
              AND (c.next_publish_at IS NULL OR c.next_publish_at <= $4)
              AND NOT EXISTS (SELECT 1 FROM proposals p WHERE p.run_id = r.id)
            ORDER BY c.priority DESC, c.id ASC
            LIMIT $5
            "#,
        )
        .bind(RunOutcome::Success)
        .bind(PublishMode::Skip)
        .bind(PublishMode::BuildOnly)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let ready = rows
            .iter()
            .map(Self::row_to_publishable)
            .collect::<ConductorResult<Vec<_>>>()?;
        debug!("就绪待发布: {} 条", ready.len());
        Ok(ready)
    }
}
