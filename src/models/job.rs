//! Acquisition job model.
//!
//! Jobs are created by an external enqueuer and mutated only by the worker
//! loop. The queue pop is destructive, so at most one worker holds a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a job asks the crawler to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Refresh the general product listing.
    RefreshBatch,
    /// Acquire products from a specific category.
    Category,
    /// Acquire trending products.
    Trending,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshBatch => "refresh_batch",
            Self::Category => "category",
            Self::Trending => "trending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "refresh_batch" => Some(Self::RefreshBatch),
            "category" => Some(Self::Category),
            "trending" => Some(Self::Trending),
            _ => None,
        }
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A single acquisition job pulled from the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionJob {
    /// Unique job identifier.
    pub id: String,
    /// What to acquire.
    pub kind: JobKind,
    /// Category filter, only meaningful for `Category` jobs.
    #[serde(default)]
    pub target_category: Option<String>,
    /// Maximum number of records to acquire.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// When the job was enqueued.
    pub requested_at: DateTime<Utc>,
    /// Current lifecycle status.
    #[serde(default = "default_status")]
    pub status: JobStatus,
}

fn default_limit() -> usize {
    50
}

fn default_status() -> JobStatus {
    JobStatus::Queued
}

impl AcquisitionJob {
    /// Create a new queued job.
    pub fn new(kind: JobKind, target_category: Option<String>, limit: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target_category,
            limit,
            requested_at: Utc::now(),
            status: JobStatus::Queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [JobKind::RefreshBatch, JobKind::Category, JobKind::Trending] {
            assert_eq!(JobKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::from_str("scrape_everything"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn test_job_deserializes_queue_message() {
        let json = r#"{"id":"j1","kind":"trending","limit":20,"requested_at":"2026-01-10T12:00:00Z"}"#;
        let job: AcquisitionJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.kind, JobKind::Trending);
        assert_eq!(job.limit, 20);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.target_category.is_none());
    }
}
