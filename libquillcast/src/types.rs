//! Core types for Quillcast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One durable unit of publish work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    /// Opaque JSON payload; see [`JobPayload`] for the publish shape.
    pub payload: String,
    pub status: JobStatus,
    pub retry_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(job_type: JobType, payload: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            job_type,
            payload,
            status: JobStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }

    /// Terminal jobs are eligible for retention purging.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobType {
    /// Publish a stored draft.
    PublishDraft,
    /// Generate a fresh article from source items, then publish.
    PublishGenerated,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PublishDraft => "publish_draft",
            JobType::PublishGenerated => "publish_generated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "publish_draft" => JobType::PublishDraft,
            _ => JobType::PublishGenerated,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload carried by publish jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    /// Draft to publish (for [`JobType::PublishDraft`]).
    pub draft_id: Option<String>,
    /// Target platform name; defaults to the first configured platform.
    pub platform: Option<String>,
    /// Requested category; resolved against the live taxonomy.
    pub category: Option<String>,
    /// Writing style hint for generation.
    pub style: Option<String>,
}

/// Stages of one publish run.
///
/// Exactly one value is active per scheduler instance. Cancellation is
/// accepted only in the whitelisted subset; mid-login navigation and
/// active insertion must run to their next checkpoint to avoid leaving a
/// half-authenticated session behind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Idle,
    CheckingAuth,
    WaitingLogin,
    LoggingIn,
    FetchingSource,
    SelectingItems,
    SelectingStyle,
    GeneratingContent,
    ProcessingImages,
    Publishing,
    CoolingDown,
    Completed,
    Failed,
    Cancelled,
}

impl PublishStage {
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            PublishStage::CheckingAuth
                | PublishStage::WaitingLogin
                | PublishStage::FetchingSource
                | PublishStage::SelectingItems
                | PublishStage::SelectingStyle
                | PublishStage::GeneratingContent
                | PublishStage::ProcessingImages
                | PublishStage::CoolingDown
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublishStage::Completed | PublishStage::Failed | PublishStage::Cancelled
        )
    }
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PublishStage::Idle => "idle",
            PublishStage::CheckingAuth => "checking_auth",
            PublishStage::WaitingLogin => "waiting_login",
            PublishStage::LoggingIn => "logging_in",
            PublishStage::FetchingSource => "fetching_source",
            PublishStage::SelectingItems => "selecting_items",
            PublishStage::SelectingStyle => "selecting_style",
            PublishStage::GeneratingContent => "generating_content",
            PublishStage::ProcessingImages => "processing_images",
            PublishStage::Publishing => "publishing",
            PublishStage::CoolingDown => "cooling_down",
            PublishStage::Completed => "completed",
            PublishStage::Failed => "failed",
            PublishStage::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Output of the content generator collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub html: String,
    pub image_keyword: String,
}

/// One recency-filtered item from the feed source collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published_at: i64,
}

/// A candidate image URL, scoped to one article's assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub provider: String,
    pub verified: bool,
}
