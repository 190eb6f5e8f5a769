//! Redis-backed job queue and job status reporting.
//!
//! Jobs arrive as `{id, type, category?, limit}` messages on a list and
//! are claimed with a blocking pop, so at most one worker ever holds a
//! job. Terminal status, timestamps, and record counts are written to a
//! per-job hash for operator inspection.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::models::{AcquisitionJob, JobKind, JobStatus};

const QUEUE_KEY: &str = "crawler:jobs";
const JOB_KEY_PREFIX: &str = "crawler:job:";
/// Job status hashes expire after a day.
const JOB_TTL_SECS: i64 = 86400;

/// Queue boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed job message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wire shape of an enqueued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl JobMessage {
    /// Validate the message into a runnable job.
    ///
    /// An unknown `type` is a classification error; the caller fails the
    /// job immediately without invoking any tier.
    pub fn classify(&self) -> Result<AcquisitionJob, String> {
        let kind = JobKind::from_str(&self.job_type)
            .ok_or_else(|| format!("unknown job type '{}'", self.job_type))?;
        Ok(AcquisitionJob {
            id: self.id.clone(),
            kind,
            target_category: self.category.clone(),
            limit: self.limit,
            requested_at: Utc::now(),
            status: JobStatus::Queued,
        })
    }
}

/// Durable job queue over a Redis list.
#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn job_key(id: &str) -> String {
        format!("{}{}", JOB_KEY_PREFIX, id)
    }

    /// Enqueue a job and mark it queued.
    pub async fn enqueue(&self, job: &AcquisitionJob) -> Result<(), QueueError> {
        let message = JobMessage {
            id: job.id.clone(),
            job_type: job.kind.as_str().to_string(),
            category: job.target_category.clone(),
            limit: job.limit,
        };
        let payload = serde_json::to_string(&message)?;

        let mut conn = self.conn.clone();
        let key = Self::job_key(&job.id);
        redis::pipe()
            .lpush(QUEUE_KEY, payload)
            .ignore()
            .hset(&key, "status", JobStatus::Queued.as_str())
            .ignore()
            .hset(&key, "requested_at", job.requested_at.to_rfc3339())
            .ignore()
            .expire(&key, JOB_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Blocking pop with timeout. `None` when the queue stayed empty.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<JobMessage>, QueueError> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn
            .brpop(QUEUE_KEY, timeout.as_secs_f64())
            .await?;

        match result {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Number of jobs waiting.
    pub async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(QUEUE_KEY).await?)
    }

    /// Mark a job running.
    pub async fn mark_running(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(id);
        redis::pipe()
            .hset(&key, "status", JobStatus::Running.as_str())
            .ignore()
            .hset(&key, "started_at", Utc::now().to_rfc3339())
            .ignore()
            .expire(&key, JOB_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Mark a job completed with the saved record count and serving tier.
    pub async fn mark_completed(
        &self,
        id: &str,
        products_count: usize,
        tier: &str,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(id);
        redis::pipe()
            .hset(&key, "status", JobStatus::Completed.as_str())
            .ignore()
            .hset(&key, "completed_at", Utc::now().to_rfc3339())
            .ignore()
            .hset(&key, "products_count", products_count.to_string())
            .ignore()
            .hset(&key, "tier", tier)
            .ignore()
            .expire(&key, JOB_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Mark a job failed with a short error classification.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(id);
        redis::pipe()
            .hset(&key, "status", JobStatus::Failed.as_str())
            .ignore()
            .hset(&key, "completed_at", Utc::now().to_rfc3339())
            .ignore()
            .hset(&key, "error", error)
            .ignore()
            .expire(&key, JOB_TTL_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Read a job's status hash.
    pub async fn job_status(&self, id: &str) -> Result<HashMap<String, String>, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(Self::job_key(id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_types() {
        for (raw, kind) in [
            ("refresh_batch", JobKind::RefreshBatch),
            ("category", JobKind::Category),
            ("trending", JobKind::Trending),
        ] {
            let message = JobMessage {
                id: "j1".to_string(),
                job_type: raw.to_string(),
                category: None,
                limit: 10,
            };
            let job = message.classify().unwrap();
            assert_eq!(job.kind, kind);
            assert_eq!(job.limit, 10);
        }
    }

    #[test]
    fn test_classify_unknown_type() {
        let message = JobMessage {
            id: "j2".to_string(),
            job_type: "scrape_the_world".to_string(),
            category: None,
            limit: 10,
        };
        let err = message.classify().unwrap_err();
        assert!(err.contains("scrape_the_world"));
    }

    #[test]
    fn test_message_wire_format() {
        let json = r#"{"id":"abc","type":"category","category":"Beleza","limit":30}"#;
        let message: JobMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.job_type, "category");
        assert_eq!(message.category.as_deref(), Some("Beleza"));

        // limit defaults when omitted
        let json = r#"{"id":"abc","type":"trending"}"#;
        let message: JobMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.limit, 50);
    }
}
