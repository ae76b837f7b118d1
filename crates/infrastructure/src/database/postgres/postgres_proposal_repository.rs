use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::{
    models::{Proposal, ProposalStatus},
    traits::ProposalRepository,
    ConductorError, ConductorResult,
};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

pub struct PostgresProposalRepository {
    pool: PgPool,
}

impl PostgresProposalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_proposal(row: &sqlx::postgres::PgRow) -> ConductorResult<Proposal> {
        Ok(Proposal {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            campaign: row.try_get("campaign")?,
            target: row.try_get("target")?,
            run_id: row.try_get("run_id")?,
            mode: row.try_get("mode")?,
            status: row.try_get("status")?,
            url: row.try_get("url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_checked_at: row.try_get("last_checked_at")?,
        })
    }
}

#[async_trait]
impl ProposalRepository for PostgresProposalRepository {
    #[instrument(skip(self, proposal), fields(
        campaign = %proposal.campaign,
        target = %proposal.target,
        run_id = %proposal.run_id,
    ))]
    async fn create(&self, proposal: &Proposal) -> ConductorResult<Proposal> {
        let row = sqlx::query(
            r#"
            INSERT INTO proposals (candidate_id, campaign, target, run_id, mode, status,
                                   url, created_at, updated_at, last_checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, candidate_id, campaign, target, run_id, mode, status, url,
                      created_at, updated_at, last_checked_at
            "#,
        )
        .bind(proposal.candidate_id)
        .bind(&proposal.campaign)
        .bind(&proposal.target)
        .bind(&proposal.run_id)
        .bind(proposal.mode)
        .bind(proposal.status)
        .bind(&proposal.url)
        .bind(proposal.created_at)
        .bind(proposal.updated_at)
        .bind(proposal.last_checked_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_proposal(&row)?;
        info!("提案已记录: id={} url={}", created.id, created.url);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Proposal>> {
        let row = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, run_id, mode, status, url,
                   created_at, updated_at, last_checked_at
            FROM proposals WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_proposal(&r)).transpose()
    }

    async fn get_open_for(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<Option<Proposal>> {
        let row = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, run_id, mode, status, url,
                   created_at, updated_at, last_checked_at
            FROM proposals
            WHERE campaign = $1 AND target = $2 AND status = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(campaign)
        .bind(target)
        .bind(ProposalStatus::Open)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_proposal(&r)).transpose()
    }

    #[instrument(skip(self, replacement), fields(old_id = %old_id))]
    async fn supersede(&self, old_id: i64, replacement: &Proposal) -> ConductorResult<Proposal> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE proposals SET status = $2, updated_at = $3
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(old_id)
        .bind(ProposalStatus::Closed)
        .bind(replacement.created_at)
        .bind(ProposalStatus::Open)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO proposals (candidate_id, campaign, target, run_id, mode, status,
                                   url, created_at, updated_at, last_checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, candidate_id, campaign, target, run_id, mode, status, url,
                      created_at, updated_at, last_checked_at
            "#,
        )
        .bind(replacement.candidate_id)
        .bind(&replacement.campaign)
        .bind(&replacement.target)
        .bind(&replacement.run_id)
        .bind(replacement.mode)
        .bind(replacement.status)
        .bind(&replacement.url)
        .bind(replacement.created_at)
        .bind(replacement.updated_at)
        .bind(replacement.last_checked_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        let created = Self::row_to_proposal(&row)?;
        info!("提案已替换: {} -> {}", old_id, created.id);
        Ok(created)
    }

    async fn update_status(
        &self,
        id: i64,
        status: ProposalStatus,
        at: DateTime<Utc>,
    ) -> ConductorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE proposals SET status = $2, updated_at = $3, last_checked_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::ProposalNotFound { id });
        }
        debug!("提案状态已更新: id={id} status={status:?}");
        Ok(())
    }

    async fn touch_checked(&self, id: i64, at: DateTime<Utc>) -> ConductorResult<()> {
        let result = sqlx::query("UPDATE proposals SET last_checked_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ConductorError::ProposalNotFound { id });
        }
        Ok(())
    }

    async fn list_open(&self, limit: i64) -> ConductorResult<Vec<Proposal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, run_id, mode, status, url,
                   created_at, updated_at, last_checked_at
            FROM proposals
            WHERE status = $1
            ORDER BY last_checked_at ASC NULLS FIRST, id ASC
            LIMIT $2
            "#,
        )
        .bind(ProposalStatus::Open)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_proposal).collect()
    }

    async fn list_created_since(&self, since: DateTime<Utc>) -> ConductorResult<Vec<Proposal>> {
        let rows = sqlx::query(
            r#"
            SELECT id, candidate_id, campaign, target, run_id, mode, status, url,
                   created_at, updated_at, last_checked_at
            FROM proposals
            WHERE created_at >= $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_proposal).collect()
    }
}
