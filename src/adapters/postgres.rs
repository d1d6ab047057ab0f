use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::{Job, JobParams, JobStatus};
use crate::error::{KeeperError, Result};
use crate::execution::JobStore;

/// PostgreSQL job store
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Connect to PostgreSQL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        ensure_found(id, result.rows_affected())
    }
}

const JOB_COLUMNS: &str = "id, owner, status, on_chain_job_id, params, created_at, updated_at, \
                           expires_at, retries, max_retries, last_error";

fn row_to_job(row: &PgRow) -> Result<Job> {
    let status: String = row.get("status");
    let status = status.parse::<JobStatus>().map_err(KeeperError::Store)?;
    let params: serde_json::Value = row.get("params");
    let params: JobParams = serde_json::from_value(params)?;
    let on_chain_job_id: Option<i64> = row.get("on_chain_job_id");
    let retries: i32 = row.get("retries");
    let max_retries: i32 = row.get("max_retries");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(Job {
        id: row.get("id"),
        owner: row.get("owner"),
        status,
        on_chain_job_id: on_chain_job_id.map(|v| v.max(0) as u64),
        created_at,
        updated_at: row.get("updated_at"),
        expires_at: row.get("expires_at"),
        retries: retries.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        last_error: row.get("last_error"),
        params,
    })
}

fn ensure_found(id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        return Err(KeeperError::JobNotFound(id.to_string()));
    }
    Ok(())
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| KeeperError::Validation(format!("{} out of range", value)))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn get_active_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE status IN ('pending', 'active') ORDER BY created_at ASC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;
        debug!("Loaded {} active jobs", jobs.len());
        Ok(jobs)
    }

    async fn mark_active(&self, id: &str) -> Result<()> {
        self.set_status(id, JobStatus::Active).await
    }

    #[instrument(skip(self))]
    async fn mark_executed(&self, id: &str, tx_hash: &str, amount_out: Option<u128>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs SET status = 'executed', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        ensure_found(id, result.rows_affected())?;

        sqlx::query(
            r#"
            INSERT INTO job_executions (job_id, tx_hash, amount_out)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .bind(amount_out.map(|a| a.to_string()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_dca_tick(
        &self,
        id: &str,
        tx_hash: &str,
        new_swaps_completed: u32,
        next_execution_ms: i64,
        amount_out: Option<u128>,
    ) -> Result<()> {
        let swaps = to_i32(new_swaps_completed)?;
        let mut tx = self.pool.begin().await?;

        // Reaching totalSwaps completes the job
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                params = jsonb_set(
                    jsonb_set(params, '{params,swapsCompleted}', to_jsonb($2::int)),
                    '{params,nextExecution}', to_jsonb($3::bigint)
                ),
                status = CASE
                    WHEN $2 >= (params->'params'->>'totalSwaps')::int THEN 'executed'
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1 AND job_type = 'dca'
            "#,
        )
        .bind(id)
        .bind(swaps)
        .bind(next_execution_ms)
        .execute(&mut *tx)
        .await?;
        ensure_found(id, result.rows_affected())?;

        sqlx::query(
            r#"
            INSERT INTO job_executions (job_id, tx_hash, amount_out, swap_index)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .bind(amount_out.map(|a| a.to_string()))
        .bind(swaps)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        ensure_found(id, result.rows_affected())
    }

    async fn increment_retry(&self, id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE jobs SET retries = retries + 1, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        ensure_found(id, result.rows_affected())
    }

    async fn mark_expired(&self, id: &str) -> Result<()> {
        self.set_status(id, JobStatus::Expired).await
    }

    async fn mark_cancelled(&self, id: &str) -> Result<()> {
        self.set_status(id, JobStatus::Cancelled).await
    }

    async fn update_last_error(&self, id: &str, error: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE jobs SET last_error = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await?;
        ensure_found(id, result.rows_affected())
    }
}
