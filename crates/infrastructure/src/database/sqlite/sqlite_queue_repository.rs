use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conductor_core::{
    models::{Candidate, Lease, LeaseState, QueuedRun, QueuedRunStatus, Run, RunOutcome},
    traits::{Assignment, QueueRepository},
    ConductorError, ConductorResult,
};
use sqlx::{types::Json, Row, SqlitePool};
use tracing::{debug, info, instrument};

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_queued_run(row: &sqlx::sqlite::SqliteRow) -> ConductorResult<QueuedRun> {
        Ok(QueuedRun {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            campaign: row.try_get("campaign")?,
            target: row.try_get("target")?,
            priority: row.try_get("priority")?,
            eligible_at: row.try_get("eligible_at")?,
            attempt_count: row.try_get("attempt_count")?,
            refresh: row.try_get("refresh")?,
            status: row.try_get("status")?,
            enqueued_at: row.try_get("enqueued_at")?,
        })
    }

    fn row_to_lease(row: &sqlx::sqlite::SqliteRow) -> ConductorResult<Lease> {
        Ok(Lease {
            id: row.try_get("id")?,
            queued_run_id: row.try_get("queued_run_id")?,
            run_id: row.try_get("run_id")?,
            candidate_id: row.try_get("candidate_id")?,
            worker_id: row.try_get("worker_id")?,
            target: row.try_get("target")?,
            state: row.try_get("state")?,
            acquired_at: row.try_get("acquired_at")?,
            renewed_at: row.try_get("renewed_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn row_to_assignable(
        row: &sqlx::sqlite::SqliteRow,
    ) -> ConductorResult<(QueuedRun, Candidate)> {
        let queued_run = QueuedRun {
            id: row.try_get("q_id")?,
            candidate_id: row.try_get("q_candidate_id")?,
            campaign: row.try_get("q_campaign")?,
            target: row.try_get("q_target")?,
            priority: row.try_get("q_priority")?,
            eligible_at: row.try_get("q_eligible_at")?,
            attempt_count: row.try_get("q_attempt_count")?,
            refresh: row.try_get("q_refresh")?,
            status: row.try_get("q_status")?,
            enqueued_at: row.try_get("q_enqueued_at")?,
        };
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
        Ok((queued_run, candidate))
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    #[instrument(skip(self, entry), fields(
        candidate_id = %entry.candidate_id,
        campaign = %entry.campaign,
        target = %entry.target,
    ))]
    async fn enqueue(&self, entry: &QueuedRun) -> ConductorResult<QueuedRun> {
        let row = sqlx::query(
            r#"
            INSERT INTO queued_runs (candidate_id, campaign, target, priority, eligible_at,
                                     attempt_count, refresh, status, enqueued_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (candidate_id) DO UPDATE SET
                priority = EXCLUDED.priority,
                eligible_at = EXCLUDED.eligible_at,
                refresh = EXCLUDED.refresh
            WHERE queued_runs.status = $8
            RETURNING id, candidate_id, campaign, target, priority, eligible_at,
                      attempt_count, refresh, status, enqueued_at
            "#,
        )
        .bind(entry.candidate_id)
        .bind(&entry.campaign)
        .bind(&entry.target)
        .bind(entry.priority)
        .bind(entry.eligible_at)
        .bind(entry.attempt_count)
        .bind(entry.refresh)
        .bind(QueuedRunStatus::Pending)
        .bind(entry.enqueued_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_queued_run(&row),
            None => self
                .get_by_candidate(entry.candidate_id)
                .await?
                .ok_or(ConductorError::QueuedRunNotFound {
                    id: entry.candidate_id,
                }),
        }
    }

    async fn get_by_candidate(&self, candidate_id: i64) -> ConductorResult<Option<QueuedRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, priority, eligible_at,
                   attempt_count, refresh, status, enqueued_at
            FROM queued_runs WHERE candidate_id = $1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_queued_run(&r)).transpose()
    }

    #[instrument(skip(self, capabilities))]
    async fn assign_next(
        &self,
        worker_id: &str,
        capabilities: &[String],
        lease_ttl_seconds: i64,
        scan_limit: i64,
        now: DateTime<Utc>,
    ) -> ConductorResult<Option<Assignment>> {
        // SQLite 没有 SKIP LOCKED，改为逐条比较并交换抢占
        let rows = sqlx::query(
            r#"
            SELECT q.id AS q_id, q.candidate_id AS q_candidate_id, q.campaign AS q_campaign,
                   q.target AS q_target, q.priority AS q_priority, q.eligible_at AS q_eligible_at,
                   q.attempt_count AS q_attempt_count, q.refresh AS q_refresh,
                   q.status AS q_status, q.enqueued_at AS q_enqueued_at,
                   c.id AS c_id, c.campaign AS c_campaign, c.target AS c_target,
                   c.command AS c_command, c.priority AS c_priority,
                   c.publish_mode AS c_publish_mode,
                   c.required_capabilities AS c_required_capabilities,
                   c.last_attempt_at AS c_last_attempt_at, c.stuck AS c_stuck,
                   c.stuck_reason AS c_stuck_reason, c.stuck_at AS c_stuck_at,
                   c.publish_attempts AS c_publish_attempts,
                   c.next_publish_at AS c_next_publish_at,
                   c.created_at AS c_created_at, c.updated_at AS c_updated_at
            FROM queued_runs q
            JOIN candidates c ON c.id = q.candidate_id
            WHERE q.status = $1
              AND q.eligible_at <= $2
              AND NOT EXISTS (
                  SELECT 1 FROM leases l
                  WHERE l.target = q.target AND l.state = $3 AND l.expires_at > $2
              )
            ORDER BY q.priority DESC, q.eligible_at ASC, q.id ASC
            LIMIT $4
            "#,
        )
        .bind(QueuedRunStatus::Pending)
        .bind(now)
        .bind(LeaseState::Active)
        .bind(scan_limit)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let (mut queued_run, candidate) = Self::row_to_assignable(row)?;
            if !candidate
                .required_capabilities
                .iter()
                .all(|cap| capabilities.contains(cap))
            {
                continue;
            }

            let mut tx = self.pool.begin().await?;

            let claimed = sqlx::query(
                "UPDATE queued_runs SET status = $2 WHERE id = $1 AND status = $3",
            )
            .bind(queued_run.id)
            .bind(QueuedRunStatus::Assigned)
            .bind(QueuedRunStatus::Pending)
            .execute(&mut *tx)
            .await?;

            // 并发分配抢先时放弃该条目
            if claimed.rows_affected() == 0 {
                tx.rollback().await?;
                continue;
            }

            let attempt = queued_run.attempt_count + 1;
            let run = Run::new(
                candidate.id,
                &candidate.campaign,
                &candidate.target,
                worker_id,
                attempt,
            );
            sqlx::query(
                r#"
                INSERT INTO runs (id, candidate_id, campaign, target, worker_id, attempt,
                                  started_at, finished_at, outcome, code, description,
                                  artifacts, log_ref, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(&run.id)
            .bind(run.candidate_id)
            .bind(&run.campaign)
            .bind(&run.target)
            .bind(&run.worker_id)
            .bind(run.attempt)
            .bind(run.started_at)
            .bind(run.finished_at)
            .bind(run.outcome)
            .bind(&run.code)
            .bind(&run.description)
            .bind(Json(&run.artifacts))
            .bind(&run.log_ref)
            .bind(run.created_at)
            .execute(&mut *tx)
            .await?;

            let lease = Lease::new(
                queued_run.id,
                candidate.id,
                &run.id,
                worker_id,
                &candidate.target,
                lease_ttl_seconds,
            );
            sqlx::query(
                r#"
                INSERT INTO leases (id, queued_run_id, run_id, candidate_id, worker_id,
                                    target, state, acquired_at, renewed_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(&lease.id)
            .bind(lease.queued_run_id)
            .bind(&lease.run_id)
            .bind(lease.candidate_id)
            .bind(&lease.worker_id)
            .bind(&lease.target)
            .bind(lease.state)
            .bind(lease.acquired_at)
            .bind(lease.renewed_at)
            .bind(lease.expires_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            queued_run.status = QueuedRunStatus::Assigned;
            info!(
                "运行已分配: run_id={} lease_id={} worker={} {}/{}",
                run.id, lease.id, worker_id, candidate.campaign, candidate.target
            );
            return Ok(Some(Assignment {
                queued_run,
                lease,
                candidate,
            }));
        }

        debug!("无可分配条目: worker={worker_id}");
        Ok(None)
    }

    async fn get_lease(&self, lease_id: &str) -> ConductorResult<Option<Lease>> {
        let row = sqlx::query(
            r#"
            SELECT id, queued_run_id, run_id, candidate_id, worker_id, target, state,
                   acquired_at, renewed_at, expires_at
            FROM leases WHERE id = $1
            "#,
        )
        .bind(lease_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_lease(&r)).transpose()
    }

    async fn list_expired_leases(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ConductorResult<Vec<Lease>> {
        let rows = sqlx::query(
            r#"
            SELECT id, queued_run_id, run_id, candidate_id, worker_id, target, state,
                   acquired_at, renewed_at, expires_at
            FROM leases
            WHERE state = $1 AND expires_at <= $2
            ORDER BY expires_at ASC
            LIMIT $3
            "#,
        )
        .bind(LeaseState::Active)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_lease).collect()
    }

    async fn renew_lease(
        &self,
        lease_id: &str,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> ConductorResult<Lease> {
        let row = sqlx::query(
            r#"
            UPDATE leases SET renewed_at = $2, expires_at = $3
            WHERE id = $1 AND state = $4 AND expires_at > $2
            RETURNING id, queued_run_id, run_id, candidate_id, worker_id, target, state,
                      acquired_at, renewed_at, expires_at
            "#,
        )
        .bind(lease_id)
        .bind(now)
        .bind(now + Duration::seconds(ttl_seconds))
        .bind(LeaseState::Active)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_lease(&row),
            None => match self.get_lease(lease_id).await? {
                Some(_) => Err(ConductorError::LeaseExpired {
                    lease_id: lease_id.to_string(),
                }),
                None => Err(ConductorError::UnknownLease {
                    lease_id: lease_id.to_string(),
                }),
            },
        }
    }

    async fn release_lease(&self, lease_id: &str, now: DateTime<Utc>) -> ConductorResult<Lease> {
        let row = sqlx::query(
            r#"
            UPDATE leases SET state = $3
            WHERE id = $1 AND state = $4 AND expires_at > $2
            RETURNING id, queued_run_id, run_id, candidate_id, worker_id, target, state,
                      acquired_at, renewed_at, expires_at
            "#,
        )
        .bind(lease_id)
        .bind(now)
        .bind(LeaseState::Released)
        .bind(LeaseState::Active)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_lease(&row),
            None => match self.get_lease(lease_id).await? {
                Some(_) => Err(ConductorError::LeaseExpired {
                    lease_id: lease_id.to_string(),
                }),
                None => Err(ConductorError::UnknownLease {
                    lease_id: lease_id.to_string(),
                }),
            },
        }
    }

    #[instrument(skip(self))]
    async fn reclaim_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE leases SET state = $3
            WHERE id = $1 AND state = $4 AND expires_at <= $2
            RETURNING run_id, queued_run_id
            "#,
        )
        .bind(lease_id)
        .bind(now)
        .bind(LeaseState::Reclaimed)
        .bind(LeaseState::Active)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let run_id: String = row.try_get("run_id")?;
        let queued_run_id: i64 = row.try_get("queued_run_id")?;

        sqlx::query(
            r#"
            UPDATE runs SET outcome = $2, code = $3, description = $4, finished_at = $5
            WHERE id = $1 AND outcome IS NULL
            "#,
        )
        .bind(&run_id)
        .bind(RunOutcome::TransientFailure)
        .bind("lease-expired")
        .bind("lease expired before a result was submitted")
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE queued_runs
            SET status = $2, attempt_count = attempt_count + 1, eligible_at = $3
            WHERE id = $1
            "#,
        )
        .bind(queued_run_id)
        .bind(QueuedRunStatus::Pending)
        .bind(eligible_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("租约已回收: lease_id={lease_id} run_id={run_id}");
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn revoke_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE leases SET state = $2
            WHERE id = $1 AND state = $3
            RETURNING run_id, queued_run_id
            "#,
        )
        .bind(lease_id)
        .bind(LeaseState::Reclaimed)
        .bind(LeaseState::Active)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let run_id: String = row.try_get("run_id")?;
        let queued_run_id: i64 = row.try_get("queued_run_id")?;

        sqlx::query(
            r#"
            UPDATE runs SET outcome = $2, code = $3, description = $4, finished_at = $5
            WHERE id = $1 AND outcome IS NULL
            "#,
        )
        .bind(&run_id)
        .bind(RunOutcome::TransientFailure)
        .bind("lease-expired")
        .bind("lease revoked by operator")
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE queued_runs
            SET status = $2, attempt_count = attempt_count + 1, eligible_at = $3
            WHERE id = $1
            "#,
        )
        .bind(queued_run_id)
        .bind(QueuedRunStatus::Pending)
        .bind(eligible_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("租约已吊销: lease_id={lease_id} run_id={run_id}");
        Ok(true)
    }

    async fn remove(&self, queued_run_id: i64) -> ConductorResult<()> {
        sqlx::query("DELETE FROM queued_runs WHERE id = $1")
            .bind(queued_run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue_transient(
        &self,
        queued_run_id: i64,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE queued_runs
            SET status = $2, attempt_count = attempt_count + 1, eligible_at = $3
            WHERE id = $1
            "#,
        )
        .bind(queued_run_id)
        .bind(QueuedRunStatus::Pending)
        .bind(eligible_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::QueuedRunNotFound { id: queued_run_id });
        }
        Ok(())
    }

    async fn pending_count(&self) -> ConductorResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM queued_runs WHERE status = $1")
            .bind(QueuedRunStatus::Pending)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("cnt")?)
    }
}
