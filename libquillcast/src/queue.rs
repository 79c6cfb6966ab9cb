//! Persistent job queue
//!
//! Durable FIFO store of publish work. Dequeuing is non-destructive: callers
//! read the oldest pending job and must explicitly claim it by moving it to
//! Processing. Only the scheduler claims jobs; everything else is read-only.

use sqlx::Row;
use tracing::warn;

use crate::db::Database;
use crate::error::{DbError, Result};
use crate::types::{Job, JobStatus, JobType};

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a new Pending job.
    pub async fn enqueue(&self, job_type: JobType, payload: String) -> Result<Job> {
        let job = Job::new(job_type, payload);

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload, status, retry_count, created_at, updated_at, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.retry_count as i64)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.last_error)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(job)
    }

    /// Oldest pending job by creation time, without claiming it.
    pub async fn next_pending(&self) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, job_type, payload, status, retry_count, created_at, updated_at, last_error
            FROM jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(row_to_job))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, job_type, payload, status, retry_count, created_at, updated_at, last_error
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(row_to_job))
    }

    /// Move a job to a new status. Failed increments the retry counter.
    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let retry_bump = if status == JobStatus::Failed { 1 } else { 0 };

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, retry_count = retry_count + ?, updated_at = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(retry_bump)
        .bind(now)
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_type, payload, status, retry_count, created_at, updated_at, last_error
            FROM jobs
            WHERE status = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.into_iter().map(row_to_job).collect())
    }

    pub async fn list_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_type, payload, status, retry_count, created_at, updated_at, last_error
            FROM jobs
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.into_iter().map(row_to_job).collect())
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal jobs whose last update is older than the retention
    /// window. Pending and Processing jobs are never purged.
    pub async fn purge_older_than(&self, retention_secs: i64) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - retention_secs;

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND updated_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Startup recovery: a crash can leave a job Processing forever. Reset
    /// any such job back to Pending exactly once per process start. Repeated
    /// crash-loops on the same job are the operator's to spot from the log.
    pub async fn reset_stuck(&self) -> Result<u64> {
        let stuck = self.list_by_status(JobStatus::Processing).await?;
        for job in &stuck {
            warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                "found job stuck in processing at startup, resetting to pending"
            );
        }

        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', updated_at = ?
            WHERE status = 'processing'
            "#,
        )
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn count_pending(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = 'pending'")
            .fetch_one(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.0 as u64)
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Job {
    Job {
        id: row.get("id"),
        job_type: JobType::parse(&row.get::<String, _>("job_type")),
        payload: row.get("payload"),
        status: JobStatus::parse(&row.get::<String, _>("status")),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_error: row.get("last_error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_queue() -> JobQueue {
        let db = Database::in_memory().await.unwrap();
        JobQueue::new(db)
    }

    #[tokio::test]
    async fn test_enqueue_and_next_pending() {
        let queue = setup_queue().await;

        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        let next = queue.next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, job.id);
        assert_eq!(next.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_fifo_order_regardless_of_type() {
        let queue = setup_queue().await;

        let first = queue
            .enqueue(JobType::PublishDraft, "{\"n\":1}".to_string())
            .await
            .unwrap();
        let second = queue
            .enqueue(JobType::PublishGenerated, "{\"n\":2}".to_string())
            .await
            .unwrap();
        let third = queue
            .enqueue(JobType::PublishDraft, "{\"n\":3}".to_string())
            .await
            .unwrap();

        // Drain in creation order
        for expected in [&first, &second, &third] {
            let next = queue.next_pending().await.unwrap().unwrap();
            assert_eq!(next.id, expected.id);
            queue
                .set_status(&next.id, JobStatus::Completed, None)
                .await
                .unwrap();
        }

        assert!(queue.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_pending_is_non_destructive() {
        let queue = setup_queue().await;
        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        // Peeking twice returns the same job; nothing is claimed implicitly
        let a = queue.next_pending().await.unwrap().unwrap();
        let b = queue.next_pending().await.unwrap().unwrap();
        assert_eq!(a.id, job.id);
        assert_eq!(b.id, job.id);
    }

    #[tokio::test]
    async fn test_set_status_failed_increments_retry_count() {
        let queue = setup_queue().await;
        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        queue
            .set_status(&job.id, JobStatus::Failed, Some("insertion exhausted"))
            .await
            .unwrap();

        let failed = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("insertion exhausted"));

        queue
            .set_status(&job.id, JobStatus::Failed, Some("again"))
            .await
            .unwrap();
        let failed = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.retry_count, 2);
    }

    #[tokio::test]
    async fn test_set_status_non_failed_keeps_retry_count() {
        let queue = setup_queue().await;
        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        queue
            .set_status(&job.id, JobStatus::Processing, None)
            .await
            .unwrap();
        queue
            .set_status(&job.id, JobStatus::Completed, None)
            .await
            .unwrap();

        let done = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(done.retry_count, 0);
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_reset_stuck_recovers_processing_jobs() {
        let queue = setup_queue().await;
        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        // Claim the job, then simulate a crash/restart
        queue
            .set_status(&job.id, JobStatus::Processing, None)
            .await
            .unwrap();

        let reset = queue.reset_stuck().await.unwrap();
        assert_eq!(reset, 1);

        let recovered = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Pending, "job must never stay stuck");
    }

    #[tokio::test]
    async fn test_reset_stuck_leaves_other_statuses_alone() {
        let queue = setup_queue().await;
        let pending = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();
        let done = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();
        queue
            .set_status(&done.id, JobStatus::Completed, None)
            .await
            .unwrap();

        let reset = queue.reset_stuck().await.unwrap();
        assert_eq!(reset, 0);

        assert_eq!(
            queue.get(&pending.id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            queue.get(&done.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_purge_only_touches_old_terminal_jobs() {
        let queue = setup_queue().await;

        let old_done = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();
        let pending = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        queue
            .set_status(&old_done.id, JobStatus::Completed, None)
            .await
            .unwrap();

        // Age the completed job past the retention window
        let old_ts = chrono::Utc::now().timestamp() - 3600;
        sqlx::query("UPDATE jobs SET updated_at = ? WHERE id = ?")
            .bind(old_ts)
            .bind(&old_done.id)
            .execute(queue.db.pool())
            .await
            .unwrap();

        let purged = queue.purge_older_than(60).await.unwrap();
        assert_eq!(purged, 1);

        assert!(queue.get(&old_done.id).await.unwrap().is_none());
        assert!(queue.get(&pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_by_status_and_count() {
        let queue = setup_queue().await;

        for _ in 0..3 {
            queue
                .enqueue(JobType::PublishGenerated, "{}".to_string())
                .await
                .unwrap();
        }
        let failed = queue
            .enqueue(JobType::PublishDraft, "{}".to_string())
            .await
            .unwrap();
        queue
            .set_status(&failed.id, JobStatus::Failed, Some("boom"))
            .await
            .unwrap();

        assert_eq!(queue.count_pending().await.unwrap(), 3);
        assert_eq!(
            queue.list_by_status(JobStatus::Pending).await.unwrap().len(),
            3
        );
        assert_eq!(
            queue.list_by_status(JobStatus::Failed).await.unwrap().len(),
            1
        );
        assert_eq!(queue.list_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let queue = setup_queue().await;
        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();

        assert!(queue.delete_by_id(&job.id).await.unwrap());
        assert!(!queue.delete_by_id(&job.id).await.unwrap());
        assert!(queue.get(&job.id).await.unwrap().is_none());
    }
}
